// ABOUTME: Size-based rotating log file writer.
// ABOUTME: Renames full files to timestamped backups and prunes them by count and age.

use chrono::{Local, Utc};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

const MEGABYTE: u64 = 1024 * 1024;
const DEFAULT_MAX_SIZE_MB: u64 = 100;
const BACKUP_TIME_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.3f";

/// Limits applied by [`RotatingFile`].
#[derive(Debug, Clone)]
pub struct RotationPolicy {
    /// Rotate once the active file would grow past this many bytes.
    pub max_bytes: u64,
    /// Backups to keep; 0 keeps all.
    pub max_backups: usize,
    /// Delete backups older than this many days; 0 disables age pruning.
    pub max_age_days: u64,
    /// Name backups with local time instead of UTC.
    pub local_time: bool,
}

impl RotationPolicy {
    /// Build a policy from megabyte-based settings; a size of 0 means 100 MB.
    pub fn from_megabytes(
        max_size_mb: u64,
        max_backups: usize,
        max_age_days: u64,
        local_time: bool,
    ) -> Self {
        let size = if max_size_mb == 0 {
            DEFAULT_MAX_SIZE_MB
        } else {
            max_size_mb
        };
        Self {
            max_bytes: size * MEGABYTE,
            max_backups,
            max_age_days,
            local_time,
        }
    }
}

/// Append-only log file that rolls over to `<stem>-<timestamp>.<ext>`.
#[derive(Debug)]
pub struct RotatingFile {
    path: PathBuf,
    policy: RotationPolicy,
    file: File,
    written: u64,
}

impl RotatingFile {
    /// Open (or create) the active log file, creating its directory if needed.
    pub fn open(path: impl Into<PathBuf>, policy: RotationPolicy) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = open_append(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path,
            policy,
            file,
            written,
        })
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        let backup = self.backup_path();
        std::fs::rename(&self.path, &backup)?;
        self.file = open_append(&self.path)?;
        self.written = 0;
        self.prune()
    }

    fn backup_path(&self) -> PathBuf {
        let stamp = if self.policy.local_time {
            Local::now().format(BACKUP_TIME_FORMAT).to_string()
        } else {
            Utc::now().format(BACKUP_TIME_FORMAT).to_string()
        };
        let (stem, ext) = split_name(&self.path);
        self.path.with_file_name(format!("{stem}-{stamp}{ext}"))
    }

    /// Backups belonging to this file, oldest first.
    pub fn backups(&self) -> io::Result<Vec<PathBuf>> {
        let (stem, ext) = split_name(&self.path);
        let prefix = format!("{stem}-");
        let dir = match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(dir) => dir.to_path_buf(),
            None => PathBuf::from("."),
        };

        let mut backups: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(&ext))
            })
            .collect();
        // Timestamps sort lexically.
        backups.sort();
        Ok(backups)
    }

    fn prune(&self) -> io::Result<()> {
        let mut backups = self.backups()?;

        if self.policy.max_age_days > 0 {
            let max_age = Duration::from_secs(self.policy.max_age_days * 24 * 60 * 60);
            let now = SystemTime::now();
            backups.retain(|path| {
                let expired = std::fs::metadata(path)
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|modified| now.duration_since(modified).ok())
                    .is_some_and(|age| age > max_age);
                if expired {
                    let _ = std::fs::remove_file(path);
                }
                !expired
            });
        }

        if self.policy.max_backups > 0 && backups.len() > self.policy.max_backups {
            let excess = backups.len() - self.policy.max_backups;
            for path in backups.iter().take(excess) {
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.policy.max_bytes {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Split `dir/name.ext` into (`name`, `.ext`).
fn split_name(path: &Path) -> (String, String) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "log".to_string());
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (stem, ext)
}
