//! Cloud Backup Library
//!
//! Incremental, optionally encrypted backup of a single file to S3-compatible
//! storage, with listing and restore.

pub mod config;
pub mod console;
pub mod crypto;
pub mod executor;
pub mod fs;
pub mod transfer;
pub mod utils;

#[cfg(test)]
mod testutil;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::BackupError;
pub type Result<T> = std::result::Result<T, BackupError>;
