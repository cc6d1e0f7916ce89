// ABOUTME: Configuration loading and validation for the honeypot.
// ABOUTME: YAML config with defaults for every field, plus template generation and CLI overrides.

use crate::error::{Result, SpotError};
use serde::{Deserialize, Serialize};
use spot_log::LogConfig;
use spot_ssh::KeyAlgorithm;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Attempts allowed when `max_auth_tries` is zero.
pub const DEFAULT_MAX_AUTH_TRIES: usize = 6;

const VERSION_PREFIX: &str = "SSH-2.0-";

/// Enablement and decision for one authentication method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthMethodConfig {
    /// Offer the method during negotiation.
    pub enable: bool,
    /// Let attempts with this method succeed.
    pub accept: bool,
}

impl AuthMethodConfig {
    /// Offered, but every attempt is refused.
    pub const HARVEST: Self = Self {
        enable: true,
        accept: false,
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub addr: String,
    /// Allow and accept the "none" method. Superseded by `no_auth` when present.
    pub no_client_auth: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_auth: Option<AuthMethodConfig>,
    pub password_auth: AuthMethodConfig,
    pub public_key_auth: AuthMethodConfig,
    pub host_keys: Vec<PathBuf>,
    pub host_key_algorithm: KeyAlgorithm,
    /// 0 means 6, negative means unlimited.
    pub max_auth_tries: i32,
    pub server_version: String,
    pub banner: String,
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:2023".to_string(),
            no_client_auth: false,
            no_auth: None,
            password_auth: AuthMethodConfig::HARVEST,
            public_key_auth: AuthMethodConfig::HARVEST,
            host_keys: vec![PathBuf::from("host.key")],
            host_key_algorithm: KeyAlgorithm::Rsa,
            max_auth_tries: DEFAULT_MAX_AUTH_TRIES as i32,
            server_version: "SSH-2.0-OpenSSH_7.4".to_string(),
            banner: "WARNING: YOU ARE BEING MONITORED!".to_string(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Read, parse and validate a YAML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| SpotError::ReadConfig {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = if contents.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(&contents).map_err(|e| SpotError::ParseConfig {
                path: path.to_path_buf(),
                source: e,
            })?
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.bind_addr()?;
        if self.host_keys.is_empty() {
            return Err(SpotError::Config("must specify at least one host key".into()));
        }
        if !self.server_version.starts_with(VERSION_PREFIX) {
            return Err(SpotError::Config(format!(
                "server_version must start with {VERSION_PREFIX}, got {:?}",
                self.server_version
            )));
        }
        if self.server_version.contains(['\r', '\n']) {
            return Err(SpotError::Config("server_version must be a single line".into()));
        }
        Ok(())
    }

    /// Write the default configuration as YAML. Refuses to replace an existing file.
    pub fn write_template(path: &Path) -> Result<()> {
        if path.exists() {
            return Err(SpotError::Config(format!(
                "{} already exists, not overwriting",
                path.display()
            )));
        }
        let yaml = serde_yaml::to_string(&Config::default())
            .map_err(|e| SpotError::EncodeConfig(e.to_string()))?;
        std::fs::write(path, yaml).map_err(|e| SpotError::WriteConfig {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Effective configuration as pretty-printed JSON.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| SpotError::EncodeConfig(e.to_string()))
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.addr.parse().map_err(|_| {
            SpotError::Config(format!(
                "addr must be <ip>:<port>, got {:?}",
                self.addr
            ))
        })
    }

    /// Replace the port of `addr`, keeping the host.
    pub fn override_port(&mut self, port: u16) -> Result<()> {
        let mut addr = self.bind_addr()?;
        addr.set_port(port);
        self.addr = addr.to_string();
        Ok(())
    }

    /// The effective "none" method settings.
    pub fn no_auth(&self) -> AuthMethodConfig {
        self.no_auth.unwrap_or(AuthMethodConfig {
            enable: self.no_client_auth,
            accept: self.no_client_auth,
        })
    }

    pub fn max_auth_attempts(&self) -> usize {
        match self.max_auth_tries {
            0 => DEFAULT_MAX_AUTH_TRIES,
            n if n < 0 => usize::MAX,
            n => n as usize,
        }
    }

    /// Pre-auth banner as sent on the wire, if any.
    pub fn banner_line(&self) -> Option<String> {
        if self.banner.is_empty() {
            None
        } else {
            Some(format!("{}\r\n", self.banner))
        }
    }
}
