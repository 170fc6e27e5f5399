//! Storage capability: durable key/value collections of JSON documents.
//!
//! Concrete network backends are plugins; the in-tree `memory` backend backs
//! standalone runs and the recovery tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde_json::Value;
use thiserror::Error;

use crate::registry::Category;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StorageError {
    #[error("the specified object has not been found")]
    Missing,

    #[error("storage i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

pub trait Storage: Send + Sync + std::fmt::Debug {
    fn get(&self, collection: &str, key: &str) -> Result<Value, StorageError>;

    fn put(&self, collection: &str, key: &str, value: &Value) -> Result<(), StorageError>;

    fn remove(&self, collection: &str, key: &str) -> Result<(), StorageError>;

    /// All documents of a collection, keyed by object name.
    fn all(&self, collection: &str) -> Result<BTreeMap<String, Value>, StorageError>;
}

/// Registry tag for storage backends.
pub struct StorageTag;

impl Category for StorageTag {
    type Instance = dyn Storage;
    const NAME: &'static str = "storage";
}

/// Process-local storage backend.
#[derive(Default, Debug)]
pub struct MemoryStorage {
    collections: Mutex<BTreeMap<String, BTreeMap<String, Value>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, collection: &str, key: &str) -> Result<Value, StorageError> {
        let collections = self.collections.lock().expect("storage lock poisoned");
        collections
            .get(collection)
            .and_then(|objects| objects.get(key))
            .cloned()
            .ok_or(StorageError::Missing)
    }

    fn put(&self, collection: &str, key: &str, value: &Value) -> Result<(), StorageError> {
        let mut collections = self.collections.lock().expect("storage lock poisoned");
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    fn remove(&self, collection: &str, key: &str) -> Result<(), StorageError> {
        let mut collections = self.collections.lock().expect("storage lock poisoned");
        if let Some(objects) = collections.get_mut(collection) {
            objects.remove(key);
        }
        Ok(())
    }

    fn all(&self, collection: &str) -> Result<BTreeMap<String, Value>, StorageError> {
        let collections = self.collections.lock().expect("storage lock poisoned");
        Ok(collections.get(collection).cloned().unwrap_or_default())
    }
}
