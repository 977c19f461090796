//! Listing and restoring remote backups.
//!
//! Restores download into the restore directory and decrypt `.encrypted`
//! objects in place. The ciphertext is deleted only once decryption has
//! succeeded, so a failed decrypt always leaves the downloaded file behind.

use crate::config::Secret;
use crate::crypto::{self, artifact_path, is_encrypted_name};
use crate::transfer::progress::{ConsoleProgress, NoProgress, ProgressObserver};
use crate::transfer::{key_file_name, BackupObjectDescriptor, TransferClient};
use crate::utils::errors::{BackupError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument, Span};

/// Result of a restore that produced a file.
#[derive(Debug)]
pub struct Restored {
    /// Decrypted file, or the downloaded file when no decryption happened
    pub path: PathBuf,

    /// Set when decryption was attempted and failed; `path` is then the ciphertext
    pub decryption_error: Option<BackupError>,
}

impl Restored {
    pub fn is_complete(&self) -> bool {
        self.decryption_error.is_none()
    }
}

pub struct RestorePipeline<C> {
    client: C,
    restore_dir: PathBuf,
    encryption_key: Option<Secret>,
    show_progress: bool,
    span: Span,
}

impl<C: TransferClient> RestorePipeline<C> {
    pub fn new(client: C, restore_dir: impl Into<PathBuf>) -> Self {
        let restore_dir = restore_dir.into();
        let span = info_span!("restore", dir = %restore_dir.display());
        Self {
            client,
            restore_dir,
            encryption_key: None,
            show_progress: false,
            span,
        }
    }

    pub fn with_encryption_key(mut self, key: Secret) -> Self {
        self.encryption_key = Some(key);
        self
    }

    /// Draw a console progress bar during download
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn restore_dir(&self) -> &Path {
        &self.restore_dir
    }

    /// Remote backups under `prefix`, newest first.
    pub async fn list_backups(&self, prefix: &str) -> Result<Vec<BackupObjectDescriptor>> {
        async {
            let mut backups = self.client.list(prefix).await.map_err(|e| {
                error!("Failed to list backups: {}", e);
                e
            })?;

            if backups.is_empty() {
                info!("No backups found under '{}'", self.client.location(prefix));
            }
            backups.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
            Ok::<_, BackupError>(backups)
        }
        .instrument(self.span.clone())
        .await
    }

    /// Download `remote_key`, by default to `<restore_dir>/<key basename>`.
    pub async fn download(&self, remote_key: &str, local_path: Option<&Path>) -> Result<PathBuf> {
        self.download_inner(remote_key, local_path)
            .instrument(self.span.clone())
            .await
    }

    async fn download_inner(&self, remote_key: &str, local_path: Option<&Path>) -> Result<PathBuf> {
        let local_path = match local_path {
            Some(path) => path.to_path_buf(),
            None => self.restore_dir.join(key_file_name(remote_key)),
        };
        if let Some(parent) = local_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        info!(
            "Downloading {} to {}",
            self.client.location(remote_key),
            local_path.display()
        );

        let result = async {
            let size = self.client.stat(remote_key).await?;
            let observer = self.observer(&local_path, size);
            self.client.download(remote_key, &local_path, observer).await
        }
        .await;

        if let Err(e) = result {
            error!("Failed to download backup {}: {}", remote_key, e);
            if let Some(hint) = e.remediation_hint() {
                error!("Hint: {}", hint);
            }
            return Err(e);
        }

        info!("Download completed: {}", local_path.display());
        Ok(local_path)
    }

    /// Download a backup and, when it is encrypted and `auto_decrypt` is set,
    /// decrypt it next to the download.
    ///
    /// An explicit `output_path` names the final file: when decryption will
    /// run and the path lacks the `.encrypted` suffix, the ciphertext lands in
    /// `<output_path>.encrypted` and the plaintext in `output_path`.
    pub async fn restore(
        &self,
        remote_key: &str,
        output_path: Option<&Path>,
        auto_decrypt: bool,
    ) -> Result<Restored> {
        let decrypting = auto_decrypt && is_encrypted_name(remote_key);
        let (download_to, plain_to) = match output_path {
            Some(out) if decrypting && !is_encrypted_name(&out.to_string_lossy()) => {
                (Some(artifact_path(out)), Some(out))
            }
            _ => (output_path.map(Path::to_path_buf), None),
        };

        let downloaded = self.download(remote_key, download_to.as_deref()).await?;

        let _entered = self.span.enter();
        if !decrypting {
            return Ok(Restored {
                path: downloaded,
                decryption_error: None,
            });
        }

        info!("File is encrypted, attempting to decrypt");
        match self.decrypt(&downloaded, plain_to) {
            Ok(plain) => {
                info!("File decrypted successfully: {}", plain.display());
                match std::fs::remove_file(&downloaded) {
                    Ok(()) => info!("Removed encrypted file: {}", downloaded.display()),
                    Err(e) => warn!(
                        "Failed to remove encrypted file {}: {}",
                        downloaded.display(),
                        e
                    ),
                }
                Ok(Restored {
                    path: plain,
                    decryption_error: None,
                })
            }
            Err(e) => {
                error!(
                    "Decryption failed: {}. The encrypted file is still available at: {}",
                    e,
                    downloaded.display()
                );
                if let Some(hint) = e.remediation_hint() {
                    error!("Hint: {}", hint);
                }
                Ok(Restored {
                    path: downloaded,
                    decryption_error: Some(e),
                })
            }
        }
    }

    /// Restore every backup in order. A failure is recorded and the rest continue.
    pub async fn restore_all(
        &self,
        backups: &[BackupObjectDescriptor],
    ) -> Vec<(String, Result<Restored>)> {
        let mut results = Vec::with_capacity(backups.len());
        for backup in backups {
            let result = self.restore(&backup.key, None, true).await;
            results.push((backup.key.clone(), result));
        }
        results
    }

    fn decrypt(&self, artifact: &Path, output: Option<&Path>) -> Result<PathBuf> {
        let key = self.encryption_key.as_ref().ok_or_else(|| {
            BackupError::InvalidKey("ENCRYPTION_KEY is not configured".to_string())
        })?;
        crypto::decrypt_file(artifact, output, key.expose())
    }

    fn observer(&self, path: &Path, total: u64) -> Arc<dyn ProgressObserver> {
        if self.show_progress {
            Arc::new(ConsoleProgress::new("Downloading", path, total))
        } else {
            Arc::new(NoProgress)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CipherService;
    use crate::testutil::MemoryTransferClient;
    use chrono::{TimeZone, Utc};
    use std::fs;

    const KEY_NAME: &str = "report-2025-01-01-0900.log.encrypted";

    fn encrypted_backup(client: &MemoryTransferClient, key: &str, plaintext: &[u8]) {
        let cipher = CipherService::new(key).unwrap();
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap();
        client.insert(KEY_NAME, &cipher.encrypt(plaintext).unwrap(), at);
    }

    #[tokio::test]
    async fn test_list_empty_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = RestorePipeline::new(MemoryTransferClient::new(), dir.path());
        assert!(pipeline.list_backups("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let client = MemoryTransferClient::new();
        let t1 = Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2025, 1, 2, 9, 0, 0).unwrap();
        // The client lists oldest first
        client.insert("a-2025-01-02-0900.log", b"new", t1);
        client.insert("b-2025-01-01-0900.log.encrypted", b"old", t2);

        let pipeline = RestorePipeline::new(client, dir.path());
        let backups = pipeline.list_backups("").await.unwrap();

        assert_eq!(backups.len(), 2);
        assert_eq!(backups[0].last_modified, t2);
        assert_eq!(backups[1].last_modified, t1);
        assert!(backups[0].is_encrypted);
        assert!(!backups[1].is_encrypted);
    }

    #[tokio::test]
    async fn test_download_defaults_to_restore_dir() {
        let dir = tempfile::tempdir().unwrap();
        let restore_dir = dir.path().join("restored");
        let client = MemoryTransferClient::new();
        client.insert("nightly/a-2025-01-01-0900.log", b"log data", Utc::now());

        let pipeline = RestorePipeline::new(client, &restore_dir);
        let path = pipeline.download("nightly/a-2025-01-01-0900.log", None).await.unwrap();

        assert_eq!(path, restore_dir.join("a-2025-01-01-0900.log"));
        assert_eq!(fs::read(path).unwrap(), b"log data");
    }

    #[tokio::test]
    async fn test_download_failure_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let client = MemoryTransferClient::new();
        client.insert("a.log", b"x", Utc::now());
        client.set_fail_downloads(true);

        let pipeline = RestorePipeline::new(client, dir.path());
        let err = pipeline.restore("a.log", None, true).await.unwrap_err();
        assert!(matches!(err, BackupError::Transfer { .. }));
    }

    #[tokio::test]
    async fn test_restore_encrypted_with_correct_key() {
        let dir = tempfile::tempdir().unwrap();
        let key = CipherService::generate_key();
        let client = MemoryTransferClient::new();
        encrypted_backup(&client, &key, b"quarterly numbers\n");

        let pipeline = RestorePipeline::new(client, dir.path()).with_encryption_key(Secret::new(key));
        let restored = pipeline.restore(KEY_NAME, None, true).await.unwrap();

        assert!(restored.is_complete());
        assert_eq!(restored.path, dir.path().join("report-2025-01-01-0900.log"));
        assert_eq!(fs::read(&restored.path).unwrap(), b"quarterly numbers\n");
        assert!(!dir.path().join(KEY_NAME).exists());
    }

    #[tokio::test]
    async fn test_restore_encrypted_with_wrong_key_keeps_ciphertext() {
        let dir = tempfile::tempdir().unwrap();
        let client = MemoryTransferClient::new();
        encrypted_backup(&client, &CipherService::generate_key(), b"quarterly numbers\n");

        let pipeline = RestorePipeline::new(client, dir.path())
            .with_encryption_key(Secret::new(CipherService::generate_key()));
        let restored = pipeline.restore(KEY_NAME, None, true).await.unwrap();

        assert!(!restored.is_complete());
        assert!(matches!(restored.decryption_error, Some(BackupError::Integrity(_))));
        assert_eq!(restored.path, dir.path().join(KEY_NAME));
        assert!(restored.path.exists());
        assert!(!dir.path().join("report-2025-01-01-0900.log").exists());
    }

    #[tokio::test]
    async fn test_restore_without_key_keeps_ciphertext() {
        let dir = tempfile::tempdir().unwrap();
        let client = MemoryTransferClient::new();
        encrypted_backup(&client, &CipherService::generate_key(), b"data");

        let pipeline = RestorePipeline::new(client, dir.path());
        let restored = pipeline.restore(KEY_NAME, None, true).await.unwrap();

        assert!(matches!(restored.decryption_error, Some(BackupError::InvalidKey(_))));
        assert!(restored.path.exists());
    }

    #[tokio::test]
    async fn test_restore_without_auto_decrypt() {
        let dir = tempfile::tempdir().unwrap();
        let key = CipherService::generate_key();
        let client = MemoryTransferClient::new();
        encrypted_backup(&client, &key, b"data");

        let pipeline = RestorePipeline::new(client, dir.path()).with_encryption_key(Secret::new(key));
        let restored = pipeline.restore(KEY_NAME, None, false).await.unwrap();

        assert!(restored.is_complete());
        assert_eq!(restored.path, dir.path().join(KEY_NAME));
    }

    #[tokio::test]
    async fn test_restore_to_explicit_output() {
        let dir = tempfile::tempdir().unwrap();
        let key = CipherService::generate_key();
        let client = MemoryTransferClient::new();
        encrypted_backup(&client, &key, b"data");

        let output = dir.path().join("custom").join("copy.log.encrypted");
        let pipeline = RestorePipeline::new(client, dir.path().join("unused"))
            .with_encryption_key(Secret::new(key));
        let restored = pipeline.restore(KEY_NAME, Some(&output), true).await.unwrap();

        assert_eq!(restored.path, dir.path().join("custom").join("copy.log"));
        assert!(!output.exists());
        assert!(!dir.path().join("unused").exists());
    }

    #[tokio::test]
    async fn test_restore_to_plain_output_name() {
        let dir = tempfile::tempdir().unwrap();
        let key = CipherService::generate_key();
        let client = MemoryTransferClient::new();
        encrypted_backup(&client, &key, b"quarterly numbers\n");

        let output = dir.path().join("report.log");
        let pipeline = RestorePipeline::new(client, dir.path()).with_encryption_key(Secret::new(key));
        let restored = pipeline.restore(KEY_NAME, Some(&output), true).await.unwrap();

        assert!(restored.is_complete());
        assert_eq!(restored.path, output);
        assert_eq!(fs::read(&output).unwrap(), b"quarterly numbers\n");
        assert!(!dir.path().join("report.log.encrypted").exists());
        assert!(!dir.path().join("report.log.decrypted").exists());
    }

    #[tokio::test]
    async fn test_restore_to_plain_output_name_wrong_key_keeps_ciphertext() {
        let dir = tempfile::tempdir().unwrap();
        let client = MemoryTransferClient::new();
        encrypted_backup(&client, &CipherService::generate_key(), b"data");

        let output = dir.path().join("report.log");
        let pipeline = RestorePipeline::new(client, dir.path())
            .with_encryption_key(Secret::new(CipherService::generate_key()));
        let restored = pipeline.restore(KEY_NAME, Some(&output), true).await.unwrap();

        assert!(!restored.is_complete());
        assert_eq!(restored.path, dir.path().join("report.log.encrypted"));
        assert!(restored.path.exists());
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_restore_all_continues_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let client = MemoryTransferClient::new();
        client.insert("a-2025-01-01-0900.log", b"a", Utc::now());
        client.insert("b-2025-01-01-0900.log", b"b", Utc::now());

        let pipeline = RestorePipeline::new(client, dir.path());
        let mut backups = pipeline.list_backups("").await.unwrap();
        backups.insert(0, BackupObjectDescriptor::new("gone.log", 1, Utc::now()));

        let results = pipeline.restore_all(&backups).await;

        assert_eq!(results.len(), 3);
        assert!(results[0].1.is_err());
        assert!(results[1].1.is_ok());
        assert!(results[2].1.is_ok());
        assert!(dir.path().join("a-2025-01-01-0900.log").exists());
        assert!(dir.path().join("b-2025-01-01-0900.log").exists());
    }
}
