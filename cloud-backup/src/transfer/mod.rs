//! Remote object storage.
//!
//! Pipelines talk to storage only through [`TransferClient`]; the S3
//! implementation lives in [`s3`].

pub mod progress;
pub mod progress_stream;
pub mod s3;

use crate::crypto::is_encrypted_name;
use crate::utils::errors::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use progress::ProgressObserver;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

pub use s3::S3TransferClient;

/// A backup object as listed by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupObjectDescriptor {
    /// Full object key
    pub key: String,

    /// Object size in bytes
    pub size: u64,

    pub last_modified: DateTime<Utc>,

    /// Derived from the `.encrypted` key suffix
    pub is_encrypted: bool,
}

impl BackupObjectDescriptor {
    pub fn new(key: impl Into<String>, size: u64, last_modified: DateTime<Utc>) -> Self {
        let key = key.into();
        let is_encrypted = is_encrypted_name(&key);
        Self {
            key,
            size,
            last_modified,
            is_encrypted,
        }
    }
}

/// Last path segment of a remote key; local restores are named after it.
pub fn key_file_name(remote_key: &str) -> &str {
    remote_key
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(remote_key)
}

/// Blob-storage operations the pipelines rely on.
///
/// Progress observers are called from inside the transfer future, before it
/// resolves. Every failure is reported as `BackupError::Transfer` (or a local
/// file error for the path on this machine).
#[async_trait]
pub trait TransferClient: Send + Sync {
    async fn upload(
        &self,
        local_path: &Path,
        remote_key: &str,
        observer: Arc<dyn ProgressObserver>,
    ) -> Result<()>;

    async fn download(
        &self,
        remote_key: &str,
        local_path: &Path,
        observer: Arc<dyn ProgressObserver>,
    ) -> Result<()>;

    async fn list(&self, prefix: &str) -> Result<Vec<BackupObjectDescriptor>>;

    /// Size in bytes of a remote object.
    async fn stat(&self, remote_key: &str) -> Result<u64>;

    /// Human-readable location for log lines, e.g. `s3://bucket/key`.
    fn location(&self, remote_key: &str) -> String {
        remote_key.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_descriptor_flags_encrypted_keys() {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap();
        let plain = BackupObjectDescriptor::new("nightly/report-2025-01-01-0900.log", 10, at);
        let sealed = BackupObjectDescriptor::new("report-2025-01-01-0900.log.encrypted", 38, at);

        assert!(!plain.is_encrypted);
        assert!(sealed.is_encrypted);
    }

    #[test]
    fn test_key_file_name() {
        assert_eq!(key_file_name("nightly/web/report.log"), "report.log");
        assert_eq!(key_file_name("report.log.encrypted"), "report.log.encrypted");
    }
}
