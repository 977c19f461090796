//! File encryption for backups.
//!
//! AES-256-GCM over the whole file. Artifacts are written next to the source
//! as `<name>.encrypted` with the layout `[12-byte nonce][ciphertext][16-byte tag]`.
//! Keys are 32 random bytes in URL-safe base64.

use crate::utils::errors::{BackupError, Result};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use rand::RngCore;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Suffix that marks ciphertext files locally and remotely
pub const ENCRYPTED_SUFFIX: &str = ".encrypted";

/// Suffix used for decrypted output when the input lacks [`ENCRYPTED_SUFFIX`]
const DECRYPTED_SUFFIX: &str = ".decrypted";

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Bound into every artifact as associated data.
const ARTIFACT_AAD: &[u8] = b"cloud-backup/artifact/v1";

/// Authenticated cipher bound to one key.
#[derive(Clone)]
pub struct CipherService {
    cipher: Aes256Gcm,
}

impl CipherService {
    /// Build a cipher from an encoded key.
    pub fn new(encoded_key: &str) -> Result<Self> {
        let key = URL_SAFE
            .decode(encoded_key.trim())
            .map_err(|e| BackupError::InvalidKey(format!("key is not valid base64: {e}")))?;
        if key.len() != KEY_LEN {
            return Err(BackupError::InvalidKey(format!(
                "key must decode to {KEY_LEN} bytes, got {}",
                key.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| BackupError::InvalidKey(e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Fresh random key, encoded for storage in configuration.
    pub fn generate_key() -> String {
        let mut key = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut key);
        URL_SAFE.encode(key)
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad: ARTIFACT_AAD,
                },
            )
            .map_err(|e| BackupError::Integrity(format!("AES-GCM encrypt: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(BackupError::Integrity(
                "artifact is too short to be encrypted data".to_string(),
            ));
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);

        self.cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad: ARTIFACT_AAD,
                },
            )
            .map_err(|_| {
                BackupError::Integrity(
                    "authentication failed (wrong key, corrupted file, or not encrypted by this tool)"
                        .to_string(),
                )
            })
    }

    /// Encrypt `path` into `path + ".encrypted"`; the source is left untouched.
    pub fn encrypt_file(&self, path: &Path) -> Result<PathBuf> {
        let plaintext = fs::read(path).map_err(|e| BackupError::from_io(path, e))?;
        let ciphertext = self.encrypt(&plaintext)?;
        let artifact = artifact_path(path);

        let mut file = File::create(&artifact)?;
        let written = file.write_all(&ciphertext).and_then(|()| file.sync_all());
        if let Err(e) = written {
            drop(file);
            let _ = fs::remove_file(&artifact);
            return Err(e.into());
        }
        Ok(artifact)
    }

    /// Decrypt an artifact. Output defaults to the artifact path minus its
    /// `.encrypted` suffix. Nothing is written when authentication fails.
    pub fn decrypt_file(&self, artifact: &Path, output: Option<&Path>) -> Result<PathBuf> {
        let data = fs::read(artifact).map_err(|e| BackupError::from_io(artifact, e))?;
        let plaintext = self.decrypt(&data)?;

        let output = output
            .map(Path::to_path_buf)
            .unwrap_or_else(|| plain_path(artifact));
        fs::write(&output, plaintext)?;
        Ok(output)
    }
}

/// Encrypt a file with an encoded key.
///
/// Checks the source before the key, so a missing file is reported as
/// [`BackupError::NotFound`] even when the key is also bad.
pub fn encrypt_file(path: &Path, encoded_key: &str) -> Result<PathBuf> {
    if !path.exists() {
        return Err(BackupError::NotFound(path.to_path_buf()));
    }
    CipherService::new(encoded_key)?.encrypt_file(path)
}

/// Decrypt an artifact with an encoded key. See [`CipherService::decrypt_file`].
pub fn decrypt_file(artifact: &Path, output: Option<&Path>, encoded_key: &str) -> Result<PathBuf> {
    if !artifact.exists() {
        return Err(BackupError::NotFound(artifact.to_path_buf()));
    }
    CipherService::new(encoded_key)?.decrypt_file(artifact, output)
}

/// `<path>.encrypted`
pub fn artifact_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(ENCRYPTED_SUFFIX);
    PathBuf::from(name)
}

/// Default decryption target: strip `.encrypted`, or append `.decrypted`
/// when the suffix is absent.
pub fn plain_path(artifact: &Path) -> PathBuf {
    let raw = artifact.to_string_lossy();
    match raw.strip_suffix(ENCRYPTED_SUFFIX) {
        Some(stripped) if !stripped.is_empty() => PathBuf::from(stripped),
        _ => PathBuf::from(format!("{raw}{DECRYPTED_SUFFIX}")),
    }
}

pub fn is_encrypted_name(name: &str) -> bool {
    name.ends_with(ENCRYPTED_SUFFIX)
}
