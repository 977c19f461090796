//! One-file backup: change check, optional encryption, upload, checksum update.
//!
//! Every failure is caught here and turned into a [`BackupReport`]; nothing
//! propagates to the caller. An encrypted artifact created by a run is removed
//! by [`ArtifactGuard`] on every exit path.

use super::remote_key;
use crate::config::Secret;
use crate::crypto;
use crate::fs::{ChecksumStore, FileSnapshot};
use crate::transfer::progress::{ConsoleProgress, NoProgress, ProgressObserver};
use crate::transfer::TransferClient;
use crate::utils::errors::BackupError;
use chrono::{Local, NaiveDateTime};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

/// What to back up and how
#[derive(Debug, Clone)]
pub struct BackupOptions {
    pub source: PathBuf,

    /// Encrypt before upload (needs a key)
    pub encrypt: bool,

    /// Skip unchanged files and record checksums after upload
    pub incremental: bool,

    /// Remote key prefix
    pub prefix: String,
}

/// Stage at which a run stopped with an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupStage {
    CheckExists,
    CheckChanged,
    Encrypt,
    Upload,
}

impl fmt::Display for BackupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackupStage::CheckExists => "check-exists",
            BackupStage::CheckChanged => "check-changed",
            BackupStage::Encrypt => "encrypt",
            BackupStage::Upload => "upload",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub enum BackupOutcome {
    Uploaded {
        remote_key: String,
        bytes: u64,
        encrypted: bool,
    },
    /// Incremental mode found no change; nothing was uploaded
    Skipped,
    Failed {
        stage: BackupStage,
        error: BackupError,
    },
}

#[derive(Debug)]
pub struct BackupReport {
    pub source: PathBuf,
    pub outcome: BackupOutcome,
}

impl BackupReport {
    /// Uploaded and skipped runs both count as success.
    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, BackupOutcome::Failed { .. })
    }
}

/// Deletes a temporary artifact when dropped.
struct ArtifactGuard {
    path: PathBuf,
}

impl ArtifactGuard {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed temporary artifact {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove temporary artifact {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

pub struct BackupPipeline<C> {
    client: C,
    checksums: ChecksumStore,
    options: BackupOptions,
    encryption_key: Option<Secret>,
    show_progress: bool,
    span: Span,
}

impl<C: TransferClient> BackupPipeline<C> {
    pub fn new(client: C, checksums: ChecksumStore, options: BackupOptions) -> Self {
        let span = info_span!("backup", source = %options.source.display());
        Self {
            client,
            checksums,
            options,
            encryption_key: None,
            show_progress: false,
            span,
        }
    }

    pub fn with_encryption_key(mut self, key: Secret) -> Self {
        self.encryption_key = Some(key);
        self
    }

    /// Draw a console progress bar during upload
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Run one backup, timestamped with the current local time.
    pub async fn run(&self) -> BackupReport {
        self.run_at(Local::now().naive_local()).await
    }

    /// Run one backup with an explicit timestamp for the remote key.
    pub async fn run_at(&self, now: NaiveDateTime) -> BackupReport {
        let outcome = self.execute(now).instrument(self.span.clone()).await;
        BackupReport {
            source: self.options.source.clone(),
            outcome,
        }
    }

    async fn execute(&self, now: NaiveDateTime) -> BackupOutcome {
        let source = self.options.source.as_path();

        let snapshot = match FileSnapshot::capture(source) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("Source file '{}' is not available: {}", source.display(), e);
                return failed(BackupStage::CheckExists, e);
            }
        };

        if self.options.incremental {
            match self.checksums.has_changed(source) {
                Ok(true) => debug!("Checksum differs from last backup"),
                Ok(false) => {
                    info!("No changes since last backup of {}, skipping upload", source.display());
                    return BackupOutcome::Skipped;
                }
                Err(e) => {
                    error!("Failed to checksum {}: {}", source.display(), e);
                    return failed(BackupStage::CheckChanged, e);
                }
            }
        }

        // Armed only once this run has written the artifact; it lives until
        // this function returns, after the upload finished.
        let (upload_path, _artifact_guard) = if self.options.encrypt {
            match self.encrypt(source) {
                Ok(path) => (path.clone(), Some(ArtifactGuard::new(path))),
                Err(e) => {
                    error!("Encryption of {} failed: {}", source.display(), e);
                    if let Some(hint) = e.remediation_hint() {
                        error!("Hint: {}", hint);
                    }
                    return failed(BackupStage::Encrypt, e);
                }
            }
        } else {
            (source.to_path_buf(), None)
        };

        let key = match remote_key(source, now, &self.options.prefix, self.options.encrypt) {
            Ok(key) => key,
            Err(e) => return failed(BackupStage::Upload, e),
        };

        info!(
            "Uploading {} ({} bytes{}) to {}",
            source.display(),
            snapshot.size,
            if self.options.encrypt { ", encrypted" } else { "" },
            self.client.location(&key)
        );

        let bytes = upload_size(&upload_path).unwrap_or(snapshot.size);
        let observer = self.observer(&upload_path, bytes);
        if let Err(e) = self.client.upload(&upload_path, &key, observer).await {
            error!("Failed to upload {} to {}: {}", source.display(), self.client.location(&key), e);
            if let Some(hint) = e.remediation_hint() {
                error!("Hint: {}", hint);
            }
            return failed(BackupStage::Upload, e);
        }
        info!("Backup uploaded to {}", self.client.location(&key));

        if self.options.incremental {
            if let Err(e) = self.checksums.update(source) {
                warn!(
                    "Backup succeeded but checksum store {} could not be updated: {}",
                    self.checksums.store_path().display(),
                    e
                );
            }
        }

        BackupOutcome::Uploaded {
            remote_key: key,
            bytes,
            encrypted: self.options.encrypt,
        }
    }

    fn encrypt(&self, source: &Path) -> crate::Result<PathBuf> {
        let key = self.encryption_key.as_ref().ok_or_else(|| {
            BackupError::InvalidKey("encryption is enabled but no key is configured".to_string())
        })?;
        let artifact = crypto::encrypt_file(source, key.expose())?;
        debug!("Encrypted {} -> {}", source.display(), artifact.display());
        Ok(artifact)
    }

    fn observer(&self, path: &Path, total: u64) -> Arc<dyn ProgressObserver> {
        if self.show_progress {
            Arc::new(ConsoleProgress::new("Uploading", path, total))
        } else {
            Arc::new(NoProgress)
        }
    }
}

fn failed(stage: BackupStage, error: BackupError) -> BackupOutcome {
    BackupOutcome::Failed { stage, error }
}

fn upload_size(path: &Path) -> Option<u64> {
    std::fs::metadata(path).ok().map(|m| m.len())
}
