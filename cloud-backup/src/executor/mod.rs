//! Backup and restore pipelines.
//!
//! Each pipeline owns its transfer client and a tracing span; neither
//! depends on the other. Remote keys are derived here so both sides agree on
//! the naming scheme.

pub mod backup;
pub mod restore;

use crate::crypto::ENCRYPTED_SUFFIX;
use crate::utils::errors::{BackupError, Result};
use chrono::NaiveDateTime;
use std::path::Path;

pub use backup::{BackupOptions, BackupOutcome, BackupPipeline, BackupReport, BackupStage};
pub use restore::{RestorePipeline, Restored};

/// Minute-resolution timestamp embedded in remote keys
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H%M";

/// Derive the remote key for a backup of `source` taken at `at`.
///
/// `<prefix>/<stem>-<YYYY-MM-DD-HHMM><.ext>[.encrypted]`; the prefix segment is
/// omitted when empty.
pub fn remote_key(source: &Path, at: NaiveDateTime, prefix: &str, encrypted: bool) -> Result<String> {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy())
        .ok_or_else(|| {
            BackupError::Config(format!("source path {} has no file name", source.display()))
        })?;
    let extension = source
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut key = format!("{}-{}{}", stem, at.format(TIMESTAMP_FORMAT), extension);
    if encrypted {
        key.push_str(ENCRYPTED_SUFFIX);
    }

    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        Ok(key)
    } else {
        Ok(format!("{prefix}/{key}"))
    }
}
