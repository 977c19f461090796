//! File metadata captured at the start of a backup.

use super::absolute_path;
use crate::utils::errors::{BackupError, Result};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Point-in-time view of the source file
#[derive(Debug, Clone, Serialize)]
pub struct FileSnapshot {
    /// Absolute path
    pub path: PathBuf,

    /// File size in bytes
    pub size: u64,

    /// Last modified time (seconds since Unix epoch)
    pub modified: u64,
}

impl FileSnapshot {
    /// Capture metadata for a regular file.
    ///
    /// Fails with [`BackupError::NotFound`] when the path does not exist, and
    /// with an I/O error when it names something other than a regular file.
    pub fn capture(path: &Path) -> Result<Self> {
        let metadata = fs::metadata(path).map_err(|e| BackupError::from_io(path, e))?;
        if !metadata.is_file() {
            return Err(BackupError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            )));
        }

        let modified = metadata
            .modified()?
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        Ok(Self {
            path: absolute_path(path)?,
            size: metadata.len(),
            modified,
        })
    }
}
