//! SQLite-backed key/value storage
//!
//! A single `kv` table holding opaque string values. WAL mode keeps reads
//! concurrent with the (rare) writes.

use async_trait::async_trait;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

use super::{KeyValueStorage, StorageError};

pub struct SqliteStorage {
    db: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open or create the database file under `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| StorageError::Backend(format!("creating data directory: {e}")))?;
        let db_path = data_dir.join("biblioteca.db");
        let db = Connection::open(&db_path)
            .map_err(|e| StorageError::Backend(format!("opening {}: {e}", db_path.display())))?;

        db.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(backend)?;
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            );",
        )
        .map_err(backend)?;

        info!(path = %db_path.display(), "Key/value storage initialized");

        Ok(Self { db: Mutex::new(db) })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned lock means a previous statement panicked; the
        // connection itself is still usable.
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn backend(e: rusqlite::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

#[async_trait]
impl KeyValueStorage for SqliteStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let db = self.lock();
        let mut stmt = db
            .prepare_cached("SELECT value FROM kv WHERE key = ?1")
            .map_err(backend)?;
        match stmt.query_row([key], |row| row.get::<_, String>(0)) {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(backend(e)),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.lock()
            .execute(
                "INSERT INTO kv (key, value, updated_at)
                 VALUES (?1, ?2, strftime('%s', 'now'))
                 ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = strftime('%s', 'now')",
                rusqlite::params![key, value],
            )
            .map(|_| ())
            .map_err(backend)
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.lock()
            .execute("DELETE FROM kv WHERE key = ?1", [key])
            .map(|_| ())
            .map_err(backend)
    }

    async fn get_all_keys(&self) -> Result<Vec<String>, StorageError> {
        let db = self.lock();
        let mut stmt = db.prepare_cached("SELECT key FROM kv").map_err(backend)?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(backend)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend)?;
        Ok(keys)
    }

    async fn multi_remove(&self, keys: &[String]) -> Result<(), StorageError> {
        let db = self.lock();
        let mut stmt = db
            .prepare_cached("DELETE FROM kv WHERE key = ?1")
            .map_err(backend)?;
        for key in keys {
            stmt.execute([key]).map_err(backend)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_roundtrip_and_upsert() {
        let dir = TempDir::new().unwrap();
        let storage = SqliteStorage::open(dir.path()).unwrap();

        storage.set("game_state", "{\"user\":{}}").await.unwrap();
        storage.set("game_state", "{\"user\":{\"level\":2}}").await.unwrap();

        let value = storage.get("game_state").await.unwrap().unwrap();
        assert!(value.contains("level"));
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let dir = TempDir::new().unwrap();
        let storage = SqliteStorage::open(dir.path()).unwrap();
        assert!(storage.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_all_keys_and_multi_remove() {
        let dir = TempDir::new().unwrap();
        let storage = SqliteStorage::open(dir.path()).unwrap();

        storage.set("embedded_bookmarks_b1", "[]").await.unwrap();
        storage.set("embedded_notes_b1_c1", "[]").await.unwrap();
        storage.set("game_state", "{}").await.unwrap();

        let embedded: Vec<String> = storage
            .get_all_keys()
            .await
            .unwrap()
            .into_iter()
            .filter(|k| k.starts_with("embedded_"))
            .collect();
        assert_eq!(embedded.len(), 2);

        storage.multi_remove(&embedded).await.unwrap();
        let keys = storage.get_all_keys().await.unwrap();
        assert_eq!(keys, vec!["game_state".to_string()]);
    }
}
