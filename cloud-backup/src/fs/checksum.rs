//! Content checksums for incremental backups.
//!
//! The store is a JSON object mapping absolute file paths to lowercase hex
//! SHA-256 digests. A missing or unreadable store is treated as empty so a
//! damaged file can only cause an extra upload, never a failed backup.

use super::absolute_path;
use crate::utils::errors::{BackupError, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Store file name used when none is configured
pub const DEFAULT_CHECKSUM_FILE: &str = ".backup_checksums.json";

/// Read buffer for digest calculation (8KB)
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Compute the SHA-256 digest of a file, streaming it in fixed-size chunks.
pub fn digest(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| BackupError::from_io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; READ_CHUNK_SIZE];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Persisted mapping of absolute path to last successfully backed-up digest.
#[derive(Debug, Clone)]
pub struct ChecksumStore {
    store_path: PathBuf,
}

impl ChecksumStore {
    pub fn new(store_path: impl Into<PathBuf>) -> Self {
        Self {
            store_path: store_path.into(),
        }
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    /// True when `path` has no record or its current digest differs from the stored one.
    pub fn has_changed(&self, path: &Path) -> Result<bool> {
        let current = digest(path)?;
        let key = record_key(path)?;

        match self.load().get(&key) {
            Some(stored) => Ok(*stored != current),
            None => Ok(true),
        }
    }

    /// Record the current digest of `path`, rewriting the whole store.
    pub fn update(&self, path: &Path) -> Result<()> {
        let current = digest(path)?;
        let key = record_key(path)?;

        let mut records = self.load();
        debug!("Recording checksum {} for {}", current, key);
        records.insert(key, current);
        self.save(&records)
    }

    /// Stored digest for `path`, if any.
    pub fn stored(&self, path: &Path) -> Result<Option<String>> {
        let key = record_key(path)?;
        Ok(self.load().remove(&key))
    }

    fn load(&self) -> BTreeMap<String, String> {
        let content = match fs::read_to_string(&self.store_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
            Err(e) => {
                warn!(
                    "Cannot read checksum store {}: {} (treating as empty)",
                    self.store_path.display(),
                    e
                );
                return BTreeMap::new();
            }
        };

        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!(
                "Checksum store {} is malformed: {} (treating as empty)",
                self.store_path.display(),
                e
            );
            BTreeMap::new()
        })
    }

    /// Write to a sibling temp file, then rename it over the store.
    fn save(&self, records: &BTreeMap<String, String>) -> Result<()> {
        let json = serde_json::to_string_pretty(records)?;

        let mut tmp_name = self
            .store_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| DEFAULT_CHECKSUM_FILE.into());
        tmp_name.push(".tmp");
        let tmp_path = self.store_path.with_file_name(tmp_name);

        fs::write(&tmp_path, json)?;
        if let Err(e) = fs::rename(&tmp_path, &self.store_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        Ok(())
    }
}

fn record_key(path: &Path) -> Result<String> {
    Ok(absolute_path(path)?.to_string_lossy().into_owned())
}
