// Storage abstraction for the contact table
//
// A byte-oriented key-value seam so the contact store does not depend on a
// particular engine. Sled backs durable storage; memory backs tests.

use crate::ContactBookError;
use anyhow::Context;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Unified storage trait for contact persistence.
///
/// `scan_prefix` returns entries in ascending key order.
pub trait StorageBackend: Send + Sync {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), ContactBookError>;
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, ContactBookError>;
    /// Returns whether a value was present.
    fn remove(&self, key: &[u8]) -> Result<bool, ContactBookError>;
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, ContactBookError>;
    fn count_prefix(&self, prefix: &[u8]) -> Result<usize, ContactBookError>;
    fn flush(&self) -> Result<(), ContactBookError>;
}

/// In-memory storage useful for testing and throwaway sessions
#[derive(Clone, Default)]
pub struct MemoryStorage {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryStorage {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), ContactBookError> {
        self.data.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, ContactBookError> {
        Ok(self.data.read().get(key).cloned())
    }

    fn remove(&self, key: &[u8]) -> Result<bool, ContactBookError> {
        Ok(self.data.write().remove(key).is_some())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, ContactBookError> {
        let data = self.data.read();
        let results = data
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(results)
    }

    fn count_prefix(&self, prefix: &[u8]) -> Result<usize, ContactBookError> {
        let data = self.data.read();
        let count = data
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .count();
        Ok(count)
    }

    fn flush(&self) -> Result<(), ContactBookError> {
        Ok(())
    }
}

/// Durable storage on top of a sled database directory
pub struct SledStorage {
    db: sled::Db,
}

impl SledStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ContactBookError> {
        let path = path.as_ref();
        let db = sled::open(path)
            .with_context(|| format!("Failed to open contact database at {}", path.display()))
            .map_err(|e| ContactBookError::Storage(format!("{:#}", e)))?;
        tracing::debug!("Opened sled storage at {}", path.display());
        Ok(Self { db })
    }
}

impl StorageBackend for SledStorage {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), ContactBookError> {
        self.db.insert(key, value).map_err(storage_err)?;
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, ContactBookError> {
        let value = self.db.get(key).map_err(storage_err)?;
        Ok(value.map(|ivec| ivec.to_vec()))
    }

    fn remove(&self, key: &[u8]) -> Result<bool, ContactBookError> {
        let previous = self.db.remove(key).map_err(storage_err)?;
        Ok(previous.is_some())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, ContactBookError> {
        let mut results = Vec::new();
        for item in self.db.scan_prefix(prefix) {
            let (k, v) = item.map_err(storage_err)?;
            results.push((k.to_vec(), v.to_vec()));
        }
        Ok(results)
    }

    fn count_prefix(&self, prefix: &[u8]) -> Result<usize, ContactBookError> {
        let mut count = 0;
        for item in self.db.scan_prefix(prefix).keys() {
            item.map_err(storage_err)?;
            count += 1;
        }
        Ok(count)
    }

    fn flush(&self) -> Result<(), ContactBookError> {
        self.db.flush().map_err(storage_err)?;
        Ok(())
    }
}

fn storage_err(err: impl std::fmt::Display) -> ContactBookError {
    ContactBookError::Storage(err.to_string())
}
