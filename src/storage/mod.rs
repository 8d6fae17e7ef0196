//! Storage layer - the async key/value persistence primitive
//!
//! The engine never talks to a concrete database directly; it goes through
//! [`KeyValueStorage`] so the hosting platform (or a test) supplies the
//! backend. Persistence is assumed eventual and unordered; absence of a key
//! is not an error.

pub mod sqlite;

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

pub use sqlite::SqliteStorage;

/// Storage faults are always caught at the component boundary above; this
/// error never propagates past the store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    #[error("Backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait KeyValueStorage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
    async fn get_all_keys(&self) -> Result<Vec<String>, StorageError>;
    async fn multi_remove(&self, keys: &[String]) -> Result<(), StorageError>;
}

/// In-memory backend for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStorage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn get_all_keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.entries.lock().await.keys().cloned().collect())
    }

    async fn multi_remove(&self, keys: &[String]) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().await;
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_roundtrip_and_absence() {
        let storage = MemoryStorage::new();
        assert!(storage.get("missing").await.unwrap().is_none());

        storage.set("k", "v").await.unwrap();
        assert_eq!(storage.get("k").await.unwrap().as_deref(), Some("v"));

        storage.remove("k").await.unwrap();
        assert!(storage.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_multi_remove() {
        let storage = MemoryStorage::new();
        storage.set("a", "1").await.unwrap();
        storage.set("b", "2").await.unwrap();
        storage.set("c", "3").await.unwrap();

        storage
            .multi_remove(&["a".to_string(), "c".to_string()])
            .await
            .unwrap();

        let mut keys = storage.get_all_keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["b".to_string()]);
    }
}
