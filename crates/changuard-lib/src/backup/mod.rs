//! Password-protected, portable channel backups.
//!
//! An exported blob is `changuard-backup-v1:` followed by a base64 JSON envelope holding the
//! scrypt parameters, salt, AES-256-GCM nonce and ciphertext. The envelope header is bound to
//! the ciphertext as associated data. Importing fails closed: any problem, from a wrong
//! password to a truncated blob, is reported as the same [`BackupError::DecryptionFailed`].

mod codec;
pub use codec::{
    ChannelBackupCodec, DecryptedBackup, EncryptedBackupBlob, KdfParams, BACKUP_FORMAT_TAG,
    ENVELOPE_VERSION, KDF_ALGORITHM, PAYLOAD_SCHEMA_VERSION,
};

mod config;
pub use config::BackupConfig;

mod error;
pub use error::BackupError;

mod record;
pub use record::ChannelBackupRecord;

mod vault;
pub use vault::{BackupVault, BACKUP_STORAGE_KEY};
