//! Custom error types for the backup tool.

use std::fmt::Display;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("Integrity check failed: {0}")]
    Integrity(String),

    #[error("{operation} failed: {message}")]
    Transfer { operation: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BackupError {
    /// Wrap a transport failure together with the operation that hit it.
    pub fn transfer(operation: impl Into<String>, err: impl Display) -> Self {
        BackupError::Transfer {
            operation: operation.into(),
            message: err.to_string(),
        }
    }

    /// Map an I/O error on a local file, turning `NotFound` into [`BackupError::NotFound`].
    pub fn from_io(path: &Path, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            BackupError::NotFound(path.to_path_buf())
        } else {
            BackupError::Io(err)
        }
    }

    /// Operator-facing hint for failures that need action outside the tool.
    pub fn remediation_hint(&self) -> Option<&'static str> {
        match self {
            BackupError::Transfer { .. } => Some(
                "check AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY, that S3_BUCKET_NAME exists in \
                 AWS_REGION, and that the credentials allow s3:PutObject, s3:GetObject and s3:ListBucket",
            ),
            BackupError::InvalidKey(_) => {
                Some("generate a key with `cloud-backup keygen` and set it as ENCRYPTION_KEY")
            }
            BackupError::Integrity(_) => Some(
                "the key differs from the one used for the backup, or the file is corrupted \
                 or was not produced by this tool",
            ),
            _ => None,
        }
    }
}

impl From<config::ConfigError> for BackupError {
    fn from(err: config::ConfigError) -> Self {
        BackupError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io_maps_not_found() {
        let err = BackupError::from_io(
            Path::new("missing.log"),
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(err, BackupError::NotFound(ref p) if p == Path::new("missing.log")));

        let err = BackupError::from_io(
            Path::new("locked.log"),
            io::Error::new(io::ErrorKind::PermissionDenied, "nope"),
        );
        assert!(matches!(err, BackupError::Io(_)));
    }

    #[test]
    fn test_transfer_display() {
        let err = BackupError::transfer("PUT a.log", "HTTP 403: AccessDenied");
        assert_eq!(err.to_string(), "PUT a.log failed: HTTP 403: AccessDenied");
        assert!(err.remediation_hint().is_some());
    }
}
