// ABOUTME: Shared logging setup for the spot binary
// ABOUTME: init() installs stdout plus optional plain or rotating file output, JSON or text

mod rotate;

pub use rotate::{RotatingFile, RotationPolicy};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Tracing target carrying SSH audit events. `file_only_ssh_log` keeps only
/// this target in the log file.
pub const AUDIT_TARGET: &str = "spot::audit";

/// Tracing target for process lifecycle events (`type = sys`).
pub const SYSTEM_TARGET: &str = "spot::system";

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("failed to open log file {path}: {source}")]
    OpenFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("a global subscriber is already installed")]
    AlreadyInitialized,
}

/// Log output settings, the `log` section of `config.yml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub debug: bool,
    pub json: bool,
    pub file_out: bool,
    pub file_name: PathBuf,
    pub file_only_ssh_log: bool,
    /// Log the client address as separate `ip` and `port` fields.
    pub separate_port: bool,
    pub rotate: RotateConfig,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: false,
            json: false,
            file_out: false,
            file_name: PathBuf::from("./logs/ssh-honeypot.log"),
            file_only_ssh_log: false,
            separate_port: false,
            rotate: RotateConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotateConfig {
    pub enable: bool,
    pub filename: PathBuf,
    /// Megabytes before the active file is rotated.
    pub max_size: u64,
    /// Days to keep backups; 0 keeps them forever.
    pub max_age: u64,
    /// Backups to keep; 0 keeps all.
    pub max_back_ups: usize,
    pub localtime: bool,
    /// Accepted for compatibility; backups are not compressed.
    pub compress: bool,
}

impl Default for RotateConfig {
    fn default() -> Self {
        Self {
            enable: false,
            filename: PathBuf::from("./logs/ssh-honeypot-rotate.log"),
            max_size: 100,
            max_age: 0,
            max_back_ups: 0,
            localtime: true,
            compress: false,
        }
    }
}

impl LogConfig {
    /// Default level when `RUST_LOG` is unset.
    pub fn level(&self) -> Level {
        if self.debug {
            Level::DEBUG
        } else {
            Level::INFO
        }
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber. Default: INFO (DEBUG with `debug`), RUST_LOG override.
///
/// Output always goes to stdout. With `file_out` it is duplicated to
/// `file_name`, or to the rotating `rotate.filename` when rotation is enabled.
///
/// # Errors
/// Fails if the log file cannot be opened or a subscriber is already set.
pub fn init(config: &LogConfig) -> Result<(), LogError> {
    let mut layers: Vec<BoxedLayer> = vec![stdout_layer(config.json)];
    if let Some(file) = file_layer(config)? {
        layers.push(file);
    }

    let filter = EnvFilter::builder()
        .with_default_directive(config.level().into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|_| LogError::AlreadyInitialized)
}

fn stdout_layer(json: bool) -> BoxedLayer {
    if json {
        fmt::layer().json().flatten_event(true).boxed()
    } else {
        fmt::layer().boxed()
    }
}

fn file_layer(config: &LogConfig) -> Result<Option<BoxedLayer>, LogError> {
    if !config.file_out {
        return Ok(None);
    }

    let layer = if config.rotate.enable {
        let rotate = &config.rotate;
        let policy = RotationPolicy::from_megabytes(
            rotate.max_size,
            rotate.max_back_ups,
            rotate.max_age,
            rotate.localtime,
        );
        let writer = RotatingFile::open(&rotate.filename, policy).map_err(|e| {
            LogError::OpenFile {
                path: rotate.filename.clone(),
                source: e,
            }
        })?;
        writer_layer(Mutex::new(writer), config.json)
    } else {
        let writer = open_log_file(&config.file_name).map_err(|e| LogError::OpenFile {
            path: config.file_name.clone(),
            source: e,
        })?;
        writer_layer(Mutex::new(writer), config.json)
    };

    if config.file_only_ssh_log {
        let audit_only = filter_fn(|metadata| metadata.target() == AUDIT_TARGET);
        Ok(Some(layer.with_filter(audit_only).boxed()))
    } else {
        Ok(Some(layer))
    }
}

fn writer_layer<W>(writer: Mutex<W>, json: bool) -> BoxedLayer
where
    W: std::io::Write + Send + 'static,
{
    let layer = fmt::layer().with_writer(writer).with_ansi(false);
    if json {
        layer.json().flatten_event(true).boxed()
    } else {
        layer.boxed()
    }
}

fn open_log_file(path: &std::path::Path) -> std::io::Result<std::fs::File> {
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
}
