//! Opaque key/value storage for secrets the engine must keep across restarts: the current
//! encrypted backup blob and restore progress.

use std::{
    collections::HashMap,
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
    #[error("Invalid storage key: {0:?}")]
    InvalidKey(String),
}

pub trait SecureStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Replaces any previous value wholesale.
    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Clearing a missing key is not an error.
    fn clear(&self, key: &str) -> Result<(), StorageError>;
}

impl<T: SecureStorage + ?Sized> SecureStorage for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        (**self).set(key, value)
    }

    fn clear(&self, key: &str) -> Result<(), StorageError> {
        (**self).clear(key)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecureStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }
}

/// One file per key under a directory. Writes go to a temporary file that is renamed over
/// the previous value, so readers never observe a torn write.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(key))
    }
}

impl SecureStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let tmp_path = self.dir.join(format!(".{}.tmp", key));
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(value)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;
        debug!("Stored {} bytes under {:?}", value.len(), path);
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_storage(storage: &dyn SecureStorage) {
        assert_eq!(storage.get("blob").unwrap(), None);
        storage.set("blob", b"first").unwrap();
        storage.set("blob", b"second").unwrap();
        assert_eq!(storage.get("blob").unwrap(), Some(b"second".to_vec()));
        storage.clear("blob").unwrap();
        storage.clear("blob").unwrap();
        assert_eq!(storage.get("blob").unwrap(), None);
    }

    #[test]
    fn test_memory_storage() {
        check_storage(&MemoryStorage::new());
    }

    #[test]
    fn test_file_storage() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("secure")).unwrap();
        check_storage(&storage);

        storage.set("restore_progress", b"{}").unwrap();
        let reopened = FileStorage::new(storage.dir()).unwrap();
        assert_eq!(
            reopened.get("restore_progress").unwrap(),
            Some(b"{}".to_vec())
        );
    }

    #[test]
    fn test_file_storage_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        assert!(matches!(
            storage.set("../escape", b"x"),
            Err(StorageError::InvalidKey(_))
        ));
        assert!(matches!(storage.get(""), Err(StorageError::InvalidKey(_))));
    }
}
