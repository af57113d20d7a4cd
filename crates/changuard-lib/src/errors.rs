use ractor::SpawnErr;
use thiserror::Error;

use crate::{
    backup::BackupError, chain::ChainError, config::ConfigError, htlc::HtlcMonitorError,
    recovery::RecoveryError, restore::RestoreError, storage::StorageError,
    transport::TransportError,
};

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
    #[error("Failed to spawn actor: {0}")]
    SpawnErr(#[from] SpawnErr),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Recovery error: {0}")]
    Recovery(#[from] RecoveryError),
    #[error("HTLC monitor error: {0}")]
    HtlcMonitor(#[from] HtlcMonitorError),
    #[error("Backup error: {0}")]
    Backup(#[from] BackupError),
    #[error("Restore error: {0}")]
    Restore(#[from] RestoreError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),
    #[error("Internal error: {0}")]
    InternalError(anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
