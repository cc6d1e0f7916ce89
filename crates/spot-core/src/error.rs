// ABOUTME: Error types for spot-core.
// ABOUTME: SpotError covers startup failures; ShellError ends an emulated shell.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpotError {
    #[error("Failed to read config {path}: {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    ParseConfig {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to write config {path}: {source}")]
    WriteConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode config: {0}")]
    EncodeConfig(String),

    #[error("Host key error: {0}")]
    Identity(#[from] spot_ssh::IdentityError),

    #[error("Failed to listen on {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpotError {
    /// True for errors caused by the configuration rather than the environment.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SpotError::ParseConfig { .. } | SpotError::Config(_) | SpotError::EncodeConfig(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SpotError>;

/// Why an emulated shell stopped before end of input.
#[derive(Error, Debug)]
pub enum ShellError {
    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_are_classified() {
        assert!(SpotError::Config("addr is required".into()).is_configuration());
        let io = SpotError::Io(std::io::Error::other("boom"));
        assert!(!io.is_configuration());
    }

    #[test]
    fn bind_error_names_address() {
        let err = SpotError::Bind {
            addr: "127.0.0.1:2023".parse().expect("valid addr"),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        assert_eq!(err.to_string(), "Failed to listen on 127.0.0.1:2023: in use");
    }

    #[test]
    fn shell_error_display() {
        let err = ShellError::Write(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"));
        assert_eq!(err.to_string(), "write failed: gone");
    }
}
