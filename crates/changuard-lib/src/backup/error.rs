use thiserror::Error;

use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("A backup must contain at least one channel")]
    EmptyBackup,
    /// Wrong password, corrupted or unsupported blob. Deliberately carries no detail.
    #[error("Failed to decrypt backup")]
    DecryptionFailed,
    #[error("Failed to encrypt backup: {0}")]
    EncryptionFailed(String),
    #[error("Invalid key derivation parameters: {0}")]
    InvalidKdfParams(String),
    #[error("Stored backup is not valid text")]
    CorruptStoredBlob,
    #[error(transparent)]
    Storage(#[from] StorageError),
}
