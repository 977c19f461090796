//! Cloud Backup - Main entry point
//!
//! Incremental, optionally encrypted single-file backup to S3.

use anyhow::Result;
use clap::{Parser, Subcommand};
use cloud_backup::console::{self, Selection};
use cloud_backup::crypto::CipherService;
use cloud_backup::executor::{
    BackupOptions, BackupOutcome, BackupPipeline, RestorePipeline, Restored,
};
use cloud_backup::fs::ChecksumStore;
use cloud_backup::transfer::S3TransferClient;
use cloud_backup::{utils, BackupError, Config};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to an optional TOML configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Back up the configured file
    Backup {
        /// File to back up (overrides BACKUP_SOURCE_PATH)
        #[arg(short, long, value_name = "PATH")]
        source: Option<PathBuf>,

        /// Encrypt before upload (overrides ENABLE_ENCRYPTION)
        #[arg(long, conflicts_with = "no_encrypt")]
        encrypt: bool,

        /// Upload without encryption (overrides ENABLE_ENCRYPTION)
        #[arg(long)]
        no_encrypt: bool,

        /// Upload even when the file is unchanged
        #[arg(long)]
        full: bool,
    },

    /// List remote backups, newest first
    List {
        /// Key prefix (defaults to S3_PREFIX)
        #[arg(short, long)]
        prefix: Option<String>,
    },

    /// Restore a backup; without a key, pick one interactively
    Restore {
        /// Remote key to restore
        key: Option<String>,

        /// Destination path (defaults to RESTORE_DIR/<key name>)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,

        /// Keep encrypted downloads as they are
        #[arg(long)]
        no_decrypt: bool,
    },

    /// Print a new encryption key for ENCRYPTION_KEY
    Keygen,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    if let Command::Keygen = args.command {
        println!("{}", CipherService::generate_key());
        eprintln!("Add this line to your .env file:");
        eprintln!("ENCRYPTION_KEY=<the key above>");
        eprintln!("Keep it safe: backups cannot be decrypted without it.");
        return Ok(ExitCode::SUCCESS);
    }

    // A missing .env file is fine; the environment may already be set.
    let _ = dotenvy::dotenv();

    let mut config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return Ok(ExitCode::FAILURE);
        }
    };

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level, config.log.file.as_deref())?;

    tracing::debug!("Starting cloud-backup v{}", env!("CARGO_PKG_VERSION"));

    let client = match S3TransferClient::new(&config.s3) {
        Ok(client) => client,
        Err(e) => {
            tracing::error!("{}", e);
            return Ok(ExitCode::FAILURE);
        }
    };

    let code = match args.command {
        Command::Backup {
            source,
            encrypt,
            no_encrypt,
            full,
        } => {
            if let Some(source) = source {
                config.backup.source_path = Some(source);
            }
            if encrypt || no_encrypt {
                if let Err(e) = config.set_encryption(encrypt) {
                    tracing::error!("{}", e);
                    return Ok(ExitCode::FAILURE);
                }
            }
            if full {
                config.backup.enable_incremental = false;
            }
            run_backup(client, &config).await
        }
        Command::List { prefix } => {
            let prefix = prefix.unwrap_or_else(|| config.s3.prefix.clone());
            run_list(restore_pipeline(client, &config), &prefix).await
        }
        Command::Restore {
            key: Some(key),
            output,
            no_decrypt,
        } => {
            let pipeline = restore_pipeline(client, &config);
            match pipeline.restore(&key, output.as_deref(), !no_decrypt).await {
                Ok(restored) => report_restored(&restored),
                Err(e) => report_error(&e),
            }
        }
        Command::Restore { key: None, .. } => {
            run_interactive_restore(restore_pipeline(client, &config), &config.s3.prefix).await?
        }
        Command::Keygen => ExitCode::SUCCESS,
    };

    Ok(code)
}

async fn run_backup(client: S3TransferClient, config: &Config) -> ExitCode {
    let source = match config.source_path() {
        Ok(source) => source.to_path_buf(),
        Err(e) => return report_error(&e),
    };

    let options = BackupOptions {
        source,
        encrypt: config.backup.enable_encryption,
        incremental: config.backup.enable_incremental,
        prefix: config.s3.prefix.clone(),
    };

    let mut pipeline = BackupPipeline::new(
        client,
        ChecksumStore::new(&config.backup.checksum_file),
        options,
    )
    .with_progress(true);
    if let Some(key) = &config.encryption_key {
        pipeline = pipeline.with_encryption_key(key.clone());
    }

    let report = pipeline.run().await;
    match &report.outcome {
        BackupOutcome::Uploaded { remote_key, .. } => {
            println!("Backup completed: {}", remote_key);
        }
        BackupOutcome::Skipped => {
            println!("No changes detected in {}, nothing uploaded", report.source.display());
        }
        BackupOutcome::Failed { stage, error } => {
            eprintln!("Backup failed during {}: {}", stage, error);
            print_hint(error);
        }
    }

    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn run_list(pipeline: RestorePipeline<S3TransferClient>, prefix: &str) -> ExitCode {
    match pipeline.list_backups(prefix).await {
        Ok(backups) => {
            print!("{}", console::render_backups(&backups));
            ExitCode::SUCCESS
        }
        Err(e) => report_error(&e),
    }
}

async fn run_interactive_restore(
    pipeline: RestorePipeline<S3TransferClient>,
    prefix: &str,
) -> Result<ExitCode> {
    let backups = match pipeline.list_backups(prefix).await {
        Ok(backups) => backups,
        Err(e) => return Ok(report_error(&e)),
    };

    print!("{}", console::render_backups(&backups));
    if backups.is_empty() {
        return Ok(ExitCode::SUCCESS);
    }

    let selection = {
        let mut stdin = io::stdin().lock();
        let mut stdout = io::stdout().lock();
        console::prompt_selection(&mut stdin, &mut stdout, backups.len())?
    };

    match selection {
        Selection::Quit => {
            println!("Restore cancelled.");
            Ok(ExitCode::SUCCESS)
        }
        Selection::One(idx) => {
            let key = &backups[idx].key;
            println!("\nRestoring: {}", key);
            match pipeline.restore(key, None, true).await {
                Ok(restored) => Ok(report_restored(&restored)),
                Err(e) => Ok(report_error(&e)),
            }
        }
        Selection::All => {
            println!("\nRestoring all {} backup(s)...", backups.len());
            let results = pipeline.restore_all(&backups).await;
            let mut failed = 0;
            for (key, result) in &results {
                match result {
                    Ok(restored) if restored.is_complete() => {}
                    Ok(_) | Err(_) => {
                        failed += 1;
                        eprintln!("Failed to restore {}", key);
                    }
                }
            }
            println!(
                "\nRestored {} of {} backup(s) into {}",
                results.len() - failed,
                results.len(),
                pipeline.restore_dir().display()
            );
            Ok(if failed == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

fn restore_pipeline(client: S3TransferClient, config: &Config) -> RestorePipeline<S3TransferClient> {
    let mut pipeline =
        RestorePipeline::new(client, &config.restore.restore_dir).with_progress(true);
    if let Some(key) = &config.encryption_key {
        pipeline = pipeline.with_encryption_key(key.clone());
    }
    pipeline
}

fn report_restored(restored: &Restored) -> ExitCode {
    match &restored.decryption_error {
        None => {
            println!("Restored to {}", restored.path.display());
            ExitCode::SUCCESS
        }
        Some(e) => {
            eprintln!(
                "Downloaded {} but could not decrypt it: {}",
                restored.path.display(),
                e
            );
            print_hint(e);
            ExitCode::FAILURE
        }
    }
}

fn report_error(err: &BackupError) -> ExitCode {
    eprintln!("Error: {}", err);
    print_hint(err);
    ExitCode::FAILURE
}

fn print_hint(err: &BackupError) {
    if let Some(hint) = err.remediation_hint() {
        eprintln!("Hint: {}", hint);
    }
}
