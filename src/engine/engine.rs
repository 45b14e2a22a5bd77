use bytes::Bytes;
use umarell_error::PersistResult;

use super::{InMemoryStore, InPersistentStore, Storage};
use crate::config::{StorageConfig, StorageType};

/// Byte backend selected by configuration.
pub enum StorageEngine {
    InMemory(InMemoryStore),
    InPersistent(InPersistentStore),
}

impl StorageEngine {
    pub fn set(
        &self,
        key: &str,
        value: Bytes,
    ) -> PersistResult<()> {
        self.get_store().set(key, value)
    }

    pub fn get(
        &self,
        key: &str,
    ) -> PersistResult<Option<Bytes>> {
        self.get_store().get(key)
    }

    pub fn del(
        &self,
        key: &str,
    ) -> PersistResult<bool> {
        self.get_store().del(key)
    }

    pub fn keys(&self) -> PersistResult<Vec<String>> {
        self.get_store().keys()
    }

    pub fn flushdb(&self) -> PersistResult<()> {
        self.get_store().flushdb()
    }

    /// Initialize storage engine based on the passed configuration.
    pub fn initialize(config: &StorageConfig) -> PersistResult<Self> {
        match config.storage_type {
            StorageType::Memory => Ok(Self::InMemory(InMemoryStore::new())),
            StorageType::Persistent => {
                let store = InPersistentStore::open(&config.path, config.sync)?;
                Ok(Self::InPersistent(store))
            }
        }
    }

    /// Gets a reference to the backend via the common `Storage` trait.
    pub fn get_store(&self) -> &dyn Storage {
        match self {
            Self::InMemory(store) => store,
            Self::InPersistent(store) => store,
        }
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self, Self::InPersistent(_))
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::InMemory(InMemoryStore::new())
    }
}
