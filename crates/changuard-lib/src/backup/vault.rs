use tracing::info;

use super::{BackupError, ChannelBackupCodec, ChannelBackupRecord, DecryptedBackup, EncryptedBackupBlob};
use crate::storage::SecureStorage;

pub const BACKUP_STORAGE_KEY: &str = "channel_backup";

/// Keeps the current backup blob in secure storage. Each export replaces the previous blob.
pub struct BackupVault<S> {
    storage: S,
    codec: ChannelBackupCodec,
}

impl<S: SecureStorage> BackupVault<S> {
    pub fn new(storage: S, codec: ChannelBackupCodec) -> Self {
        Self { storage, codec }
    }

    pub fn codec(&self) -> &ChannelBackupCodec {
        &self.codec
    }

    pub fn export(
        &self,
        records: &[ChannelBackupRecord],
        password: &str,
    ) -> Result<EncryptedBackupBlob, BackupError> {
        let blob = self.codec.export(records, password)?;
        self.store(&blob)?;
        Ok(blob)
    }

    pub fn store(&self, blob: &EncryptedBackupBlob) -> Result<(), BackupError> {
        self.storage
            .set(BACKUP_STORAGE_KEY, blob.as_str().as_bytes())?;
        info!("Stored channel backup");
        Ok(())
    }

    pub fn load(&self) -> Result<Option<EncryptedBackupBlob>, BackupError> {
        match self.storage.get(BACKUP_STORAGE_KEY)? {
            Some(bytes) => String::from_utf8(bytes)
                .map(|text| Some(EncryptedBackupBlob::from(text)))
                .map_err(|_| BackupError::CorruptStoredBlob),
            None => Ok(None),
        }
    }

    /// Decrypts the stored blob, if there is one.
    pub fn import(&self, password: &str) -> Result<Option<DecryptedBackup>, BackupError> {
        match self.load()? {
            Some(blob) => self.codec.import_backup(&blob, password).map(Some),
            None => Ok(None),
        }
    }

    pub fn clear(&self) -> Result<(), BackupError> {
        self.storage.clear(BACKUP_STORAGE_KEY)?;
        info!("Cleared stored channel backup");
        Ok(())
    }
}
