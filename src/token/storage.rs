//! Credential Storage
//!
//! Pluggable key/value persistence for the serialized credential record.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

use crate::error::StorageError;

/// Default key under which the credential record is stored.
pub const DEFAULT_STORAGE_KEY: &str = "identity_client.credentials";

/// Credential store interface.
///
/// Implementations may be backed by anything that can hold a string per key.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Read the value for a key.
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write the value for a key, replacing any previous value.
    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove the value for a key. Removing a missing key succeeds.
    async fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

/// Process-lifetime credential store.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    items: Mutex<HashMap<String, String>>,
}

impl InMemoryCredentialStore {
    /// Create new in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.items.lock().get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.items.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.items.lock().remove(key);
        Ok(())
    }
}

/// Credential store persisted to disk, one file per key.
///
/// Writes go to a temporary sibling file first and are renamed into place so
/// a reader never sees a partially written record.
pub struct FileCredentialStore {
    directory: PathBuf,
}

impl FileCredentialStore {
    /// Create a store rooted at `directory`. The directory is created on first write.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.directory.join(format!("{}.json", file_name))
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::ReadFailed {
                message: e.to_string(),
            }),
        }
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let write_failed = |e: std::io::Error| StorageError::WriteFailed {
            message: e.to_string(),
        };

        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(write_failed)?;

        let path = self.path_for(key);
        let staging = path.with_extension("json.tmp");
        // A leftover staging file would keep its old permissions.
        if let Err(e) = tokio::fs::remove_file(&staging).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(write_failed(e));
            }
        }

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&staging).await.map_err(write_failed)?;
        file.write_all(value.as_bytes())
            .await
            .map_err(write_failed)?;
        file.sync_all().await.map_err(write_failed)?;
        drop(file);

        tokio::fs::rename(&staging, &path)
            .await
            .map_err(write_failed)
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::DeleteFailed {
                message: e.to_string(),
            }),
        }
    }
}

/// Which credential store a client should use.
#[derive(Clone, Default)]
pub enum StorageKind {
    /// Kept in memory for the lifetime of the process.
    #[default]
    Memory,
    /// Persisted to files under the given directory.
    File(PathBuf),
    /// Caller-supplied store.
    Custom(Arc<dyn CredentialStore>),
}

impl StorageKind {
    /// Build the configured store.
    pub fn build(&self) -> Arc<dyn CredentialStore> {
        match self {
            Self::Memory => Arc::new(InMemoryCredentialStore::new()),
            Self::File(directory) => Arc::new(FileCredentialStore::new(directory.clone())),
            Self::Custom(store) => store.clone(),
        }
    }
}

impl std::fmt::Debug for StorageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => write!(f, "Memory"),
            Self::File(directory) => f.debug_tuple("File").field(directory).finish(),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Mock credential store for testing.
#[derive(Default)]
pub struct MockCredentialStore {
    items: Mutex<HashMap<String, String>>,
    set_history: Mutex<Vec<(String, String)>>,
    remove_history: Mutex<Vec<String>>,
    fail_reads: Mutex<bool>,
    fail_writes: Mutex<bool>,
}

impl MockCredentialStore {
    /// Create new mock store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every read fail.
    pub fn set_fail_reads(&self, fail: bool) -> &Self {
        *self.fail_reads.lock() = fail;
        self
    }

    /// Make every write and remove fail.
    pub fn set_fail_writes(&self, fail: bool) -> &Self {
        *self.fail_writes.lock() = fail;
        self
    }

    /// Pre-populate a raw value.
    pub fn insert_raw(&self, key: &str, value: &str) -> &Self {
        self.items.lock().insert(key.to_string(), value.to_string());
        self
    }

    /// Raw value currently held for `key`.
    pub fn raw(&self, key: &str) -> Option<String> {
        self.items.lock().get(key).cloned()
    }

    /// Get set history.
    pub fn get_set_history(&self) -> Vec<(String, String)> {
        self.set_history.lock().clone()
    }

    /// Get remove history.
    pub fn get_remove_history(&self) -> Vec<String> {
        self.remove_history.lock().clone()
    }
}

#[async_trait]
impl CredentialStore for MockCredentialStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        if *self.fail_reads.lock() {
            return Err(StorageError::ReadFailed {
                message: "Mock storage read failure".to_string(),
            });
        }
        Ok(self.items.lock().get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.set_history
            .lock()
            .push((key.to_string(), value.to_string()));
        if *self.fail_writes.lock() {
            return Err(StorageError::WriteFailed {
                message: "Mock storage write failure".to_string(),
            });
        }
        self.items.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.remove_history.lock().push(key.to_string());
        if *self.fail_writes.lock() {
            return Err(StorageError::DeleteFailed {
                message: "Mock storage delete failure".to_string(),
            });
        }
        self.items.lock().remove(key);
        Ok(())
    }
}

/// Create in-memory credential store.
pub fn create_in_memory_credential_store() -> InMemoryCredentialStore {
    InMemoryCredentialStore::new()
}

/// Create mock credential store for testing.
pub fn create_mock_credential_store() -> MockCredentialStore {
    MockCredentialStore::new()
}
