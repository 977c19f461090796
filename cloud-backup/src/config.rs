//! Configuration management for the backup tool.
//!
//! Settings come from the process environment (a `.env` file is loaded first
//! by the binary) layered over an optional TOML file. Everything is validated
//! once into [`Config`]; no other module reads the environment.

use crate::fs::checksum::DEFAULT_CHECKSUM_FILE;
use crate::utils::errors::{BackupError, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Secret string whose `Debug` output never shows the value.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    /// Borrow the raw value. Never pass the result to a log macro.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub s3: S3Config,
    pub backup: BackupConfig,
    pub restore: RestoreConfig,
    pub log: LogConfig,

    /// Base64 key for artifact encryption
    pub encryption_key: Option<Secret>,
}

#[derive(Debug, Clone)]
pub struct S3Config {
    /// Target bucket
    pub bucket: String,

    /// Bucket region (default: us-east-1)
    pub region: String,

    /// Custom endpoint for S3-compatible stores; AWS regional endpoint when unset
    pub endpoint: Option<String>,

    pub access_key_id: String,
    pub secret_access_key: Secret,

    /// Prefix prepended to every remote key written by `backup`
    pub prefix: String,
}

#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// File to back up
    pub source_path: Option<PathBuf>,

    /// Encrypt before upload
    pub enable_encryption: bool,

    /// Skip uploads when the checksum is unchanged
    pub enable_incremental: bool,

    /// Checksum store location
    pub checksum_file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RestoreConfig {
    /// Directory downloads land in when no output path is given
    pub restore_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Optional file that receives a copy of every log line
    pub file: Option<PathBuf>,
}

/// Flat view of every recognised variable before validation.
#[derive(Debug, Default, Deserialize)]
struct RawSettings {
    aws_access_key_id: Option<String>,
    aws_secret_access_key: Option<Secret>,
    aws_region: Option<String>,
    s3_endpoint: Option<String>,
    s3_bucket_name: Option<String>,
    s3_prefix: Option<String>,
    backup_source_path: Option<PathBuf>,
    enable_encryption: Option<bool>,
    enable_incremental: Option<bool>,
    encryption_key: Option<Secret>,
    checksum_file: Option<PathBuf>,
    restore_dir: Option<PathBuf>,
    log_level: Option<String>,
    log_file: Option<PathBuf>,
}

// Default values
fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_restore_dir() -> PathBuf {
    PathBuf::from("restored")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from the process environment, layered over an
    /// optional TOML file. Environment values win.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::load_from(file, config::Environment::default())
    }

    fn load_from(file: Option<&Path>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }
        let raw: RawSettings = builder
            .add_source(env.try_parsing(true).ignore_empty(true))
            .build()?
            .try_deserialize()?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawSettings) -> Result<Self> {
        let access_key_id = required(raw.aws_access_key_id, "AWS_ACCESS_KEY_ID")?;
        let secret_access_key = raw.aws_secret_access_key.ok_or_else(|| {
            BackupError::Config(
                "AWS credentials not found. Set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY \
                 in your .env file or environment"
                    .to_string(),
            )
        })?;
        let bucket = required(raw.s3_bucket_name, "S3_BUCKET_NAME")?;

        let enable_encryption = raw.enable_encryption.unwrap_or(false);
        if enable_encryption && raw.encryption_key.is_none() {
            return Err(BackupError::Config(
                "ENABLE_ENCRYPTION is set but ENCRYPTION_KEY is missing. \
                 Generate one with `cloud-backup keygen`"
                    .to_string(),
            ));
        }

        Ok(Config {
            s3: S3Config {
                bucket,
                region: raw.aws_region.unwrap_or_else(default_region),
                endpoint: raw.s3_endpoint,
                access_key_id,
                secret_access_key,
                prefix: raw.s3_prefix.unwrap_or_default(),
            },
            backup: BackupConfig {
                source_path: raw.backup_source_path,
                enable_encryption,
                enable_incremental: raw.enable_incremental.unwrap_or(true),
                checksum_file: raw
                    .checksum_file
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CHECKSUM_FILE)),
            },
            restore: RestoreConfig {
                restore_dir: raw.restore_dir.unwrap_or_else(default_restore_dir),
            },
            log: LogConfig {
                level: raw.log_level.unwrap_or_else(default_log_level),
                file: raw.log_file,
            },
            encryption_key: raw.encryption_key,
        })
    }

    /// Source file for `backup`; required only by that command.
    pub fn source_path(&self) -> Result<&Path> {
        self.backup.source_path.as_deref().ok_or_else(|| {
            BackupError::Config(
                "BACKUP_SOURCE_PATH is not set (or pass --source to the backup command)"
                    .to_string(),
            )
        })
    }

    /// Turn encryption on or off after loading, re-checking the key requirement.
    pub fn set_encryption(&mut self, enabled: bool) -> Result<()> {
        if enabled && self.encryption_key.is_none() {
            return Err(BackupError::Config(
                "encryption requested but ENCRYPTION_KEY is missing".to_string(),
            ));
        }
        self.backup.enable_encryption = enabled;
        Ok(())
    }
}

fn required(value: Option<String>, name: &str) -> Result<String> {
    value.ok_or_else(|| {
        BackupError::Config(format!(
            "{name} not found in environment variables. Create a .env file or export it"
        ))
    })
}
