//! In-memory transfer client for pipeline tests.

use crate::transfer::progress::ProgressObserver;
use crate::transfer::{BackupObjectDescriptor, TransferClient};
use crate::utils::errors::{BackupError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

struct StoredObject {
    data: Vec<u8>,
    last_modified: DateTime<Utc>,
}

/// Records every upload; can be told to fail uploads.
#[derive(Default)]
pub(crate) struct MemoryTransferClient {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    fail_uploads: AtomicBool,
    fail_downloads: AtomicBool,
    /// Local files that existed at the moment each upload ran
    uploaded_from: Mutex<Vec<PathBuf>>,
}

impl MemoryTransferClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_uploads() -> Self {
        let client = Self::default();
        client.fail_uploads.store(true, Ordering::Relaxed);
        client
    }

    pub fn set_fail_downloads(&self, fail: bool) {
        self.fail_downloads.store(fail, Ordering::Relaxed);
    }

    pub fn insert(&self, key: &str, data: &[u8], last_modified: DateTime<Utc>) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                data: data.to_vec(),
                last_modified,
            },
        );
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).map(|o| o.data.clone())
    }

    pub fn uploaded_from(&self) -> Vec<PathBuf> {
        self.uploaded_from.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransferClient for MemoryTransferClient {
    async fn upload(
        &self,
        local_path: &Path,
        remote_key: &str,
        observer: Arc<dyn ProgressObserver>,
    ) -> Result<()> {
        let data = std::fs::read(local_path).map_err(|e| BackupError::from_io(local_path, e))?;
        self.uploaded_from.lock().unwrap().push(local_path.to_path_buf());

        if self.fail_uploads.load(Ordering::Relaxed) {
            return Err(BackupError::transfer(
                format!("PUT {remote_key}"),
                "HTTP 403 Forbidden: AccessDenied",
            ));
        }

        observer.on_progress(data.len() as u64);
        observer.finish();
        self.insert(remote_key, &data, Utc::now());
        Ok(())
    }

    async fn download(
        &self,
        remote_key: &str,
        local_path: &Path,
        observer: Arc<dyn ProgressObserver>,
    ) -> Result<()> {
        if self.fail_downloads.load(Ordering::Relaxed) {
            return Err(BackupError::transfer(format!("GET {remote_key}"), "connection reset"));
        }
        let data = self
            .get(remote_key)
            .ok_or_else(|| BackupError::transfer(format!("GET {remote_key}"), "HTTP 404: NoSuchKey"))?;
        std::fs::write(local_path, &data)?;
        observer.on_progress(data.len() as u64);
        observer.finish();
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<BackupObjectDescriptor>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, obj)| {
                BackupObjectDescriptor::new(key.clone(), obj.data.len() as u64, obj.last_modified)
            })
            .collect())
    }

    async fn stat(&self, remote_key: &str) -> Result<u64> {
        self.get(remote_key)
            .map(|d| d.len() as u64)
            .ok_or_else(|| BackupError::transfer(format!("HEAD {remote_key}"), "object does not exist"))
    }

    fn location(&self, remote_key: &str) -> String {
        format!("memory://{remote_key}")
    }
}
