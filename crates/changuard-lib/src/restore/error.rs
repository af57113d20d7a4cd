use thiserror::Error;

use super::RestoreState;
use crate::{backup::BackupError, storage::StorageError, types::Hash256};

#[derive(Error, Debug)]
pub enum RestoreError {
    #[error("No channels to restore")]
    NoChannels,
    #[error("Channel {0} appears more than once")]
    DuplicateChannel(Hash256),
    #[error("A restore is already in progress")]
    RestoreInProgress,
    #[error("Invalid restore transition: {0:?} -> {1:?}")]
    InvalidTransition(RestoreState, RestoreState),
    #[error(transparent)]
    Backup(#[from] BackupError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Restore orchestrator is not running")]
    OrchestratorUnavailable,
    #[error("Internal error: {0}")]
    Internal(String),
}
