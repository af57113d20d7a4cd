use std::fmt::Debug;
use std::path::{Path, PathBuf};

use changuard::backup::{
    BackupError, BackupVault, ChannelBackupCodec, ChannelBackupRecord, DecryptedBackup,
    EncryptedBackupBlob,
};
use changuard::storage::FileStorage;
use changuard::{Config, ConfigArgs};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

pub struct ExitMessage(String);

impl Debug for ExitMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Exit because {}", self.0)
    }
}

#[derive(Parser)]
#[command(version, about = "Manage encrypted channel backups")]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encrypt the channel records in a JSON file and store the backup.
    Export {
        /// JSON array of channel backup records.
        #[arg(long)]
        records: PathBuf,
        /// Also write the blob to this file.
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long, env = "CHANGUARD_BACKUP_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Decrypt a backup and write its channel records as JSON.
    Import {
        /// Blob to decrypt instead of the stored one.
        #[arg(long)]
        backup: Option<PathBuf>,
        /// Write the records here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long, env = "CHANGUARD_BACKUP_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Decrypt a backup and list its channels.
    Inspect {
        /// Blob to decrypt instead of the stored one.
        #[arg(long)]
        backup: Option<PathBuf>,
        #[arg(long, env = "CHANGUARD_BACKUP_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

#[tokio::main]
pub async fn main() -> Result<(), ExitMessage> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .pretty()
        .try_init()
        .map_err(|err| ExitMessage(format!("failed to initialize logger: {}", err)))?;

    info!("Starting changuard {}", changuard::get_git_version());

    let cli = Cli::parse();
    let config = Config::from_args(cli.config)
        .map_err(|err| ExitMessage(format!("failed to load config: {}", err)))?;
    debug!("Using base directory {:?}", config.base_dir);

    let storage = FileStorage::new(config.storage_dir())
        .map_err(|err| ExitMessage(format!("failed to open secure storage: {}", err)))?;
    let codec = ChannelBackupCodec::new(config.backup.kdf_params())
        .map_err(|err| ExitMessage(format!("invalid backup config: {}", err)))?;
    let vault = BackupVault::new(storage, codec);

    // Key derivation is CPU bound.
    let result = tokio::task::spawn_blocking(move || run(vault, cli.command))
        .await
        .map_err(|err| ExitMessage(format!("command panicked: {}", err)))?;
    changuard::tasks::cancel_tasks_and_wait_for_completion().await;
    result
}

fn run(vault: BackupVault<FileStorage>, command: Command) -> Result<(), ExitMessage> {
    match command {
        Command::Export {
            records,
            output,
            password,
        } => {
            let json = read_file(&records)?;
            let records: Vec<ChannelBackupRecord> = serde_json::from_str(&json)
                .map_err(|err| ExitMessage(format!("invalid channel records: {}", err)))?;
            let blob = vault.export(&records, &password).map_err(backup_failed)?;
            match output {
                Some(path) => write_file(&path, blob.as_str())?,
                None => println!("{}", blob),
            }
        }
        Command::Import {
            backup,
            output,
            password,
        } => {
            let backup = decrypt(&vault, backup, &password)?;
            let json = serde_json::to_string_pretty(&backup.records)
                .map_err(|err| ExitMessage(format!("failed to serialize records: {}", err)))?;
            match output {
                Some(path) => {
                    write_file(&path, &json)?;
                    info!("Wrote {} channel records to {:?}", backup.records.len(), path);
                }
                None => println!("{}", json),
            }
        }
        Command::Inspect { backup, password } => {
            let backup = decrypt(&vault, backup, &password)?;
            println!(
                "Backup created at {} ms with {} channels",
                backup.created_at,
                backup.records.len()
            );
            for record in &backup.records {
                println!(
                    "{} peer {}@{}:{} funding {} initiator {}",
                    record.channel_id,
                    record.node_id,
                    record.host,
                    record.port,
                    record.funding_txid,
                    record.is_initiator
                );
            }
        }
    }
    Ok(())
}

/// Decrypts the blob in `path`, or the stored one when no path is given.
fn decrypt(
    vault: &BackupVault<FileStorage>,
    path: Option<PathBuf>,
    password: &str,
) -> Result<DecryptedBackup, ExitMessage> {
    match path {
        Some(path) => {
            let blob = EncryptedBackupBlob::from(read_file(&path)?);
            vault
                .codec()
                .import_backup(&blob, password)
                .map_err(backup_failed)
        }
        None => vault
            .import(password)
            .map_err(backup_failed)?
            .ok_or_else(|| ExitMessage("no backup stored".to_string())),
    }
}

fn read_file(path: &Path) -> Result<String, ExitMessage> {
    std::fs::read_to_string(path)
        .map_err(|err| ExitMessage(format!("failed to read {:?}: {}", path, err)))
}

fn write_file(path: &Path, contents: &str) -> Result<(), ExitMessage> {
    std::fs::write(path, contents)
        .map_err(|err| ExitMessage(format!("failed to write {:?}: {}", path, err)))
}

fn backup_failed(err: BackupError) -> ExitMessage {
    ExitMessage(format!("backup operation failed: {}", err))
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};

    use super::{Cli, Command};

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_export_with_config_flags() {
        let cli = Cli::try_parse_from([
            "changuard",
            "-d",
            "/tmp/changuard",
            "--backup-kdf-log-n",
            "10",
            "export",
            "--records",
            "records.json",
            "--password",
            "hunter2",
        ])
        .expect("parse args");
        assert_eq!(cli.config.base_dir, Some("/tmp/changuard".into()));
        match cli.command {
            Command::Export {
                records,
                output,
                password,
            } => {
                assert_eq!(records, std::path::PathBuf::from("records.json"));
                assert_eq!(output, None);
                assert_eq!(password, "hunter2");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
