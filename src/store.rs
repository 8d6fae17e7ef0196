//! Durable state store
//!
//! Owns persistence of the [`GameState`] snapshot and the mirrored embedded
//! keys. Saves are debounced — a burst of mutations collapses into a single
//! write — and at most one serialized write is ever in flight; a request
//! arriving mid-write marks it pending and the writer loops once more.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::StoreConfig;
use crate::state::{GameState, StateContainer};
use crate::storage::{KeyValueStorage, StorageError};

/// Namespace for embedded-origin keys mirrored into host storage.
pub const EMBEDDED_PREFIX: &str = "embedded_";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

enum SaveState {
    Idle,
    Saving { pending: bool },
}

pub struct DurableStateStore {
    storage: Arc<dyn KeyValueStorage>,
    state: Arc<StateContainer>,
    cfg: StoreConfig,
    save_state: Mutex<SaveState>,
    debounce_gen: AtomicU64,
}

impl DurableStateStore {
    pub fn new(
        storage: Arc<dyn KeyValueStorage>,
        state: Arc<StateContainer>,
        cfg: StoreConfig,
    ) -> Self {
        Self {
            storage,
            state,
            cfg,
            save_state: Mutex::new(SaveState::Idle),
            debounce_gen: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> &Arc<StateContainer> {
        &self.state
    }

    fn save_state(&self) -> std::sync::MutexGuard<'_, SaveState> {
        self.save_state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ---- Snapshot persistence -------------------------------------------

    /// Load the snapshot from storage into the container.
    ///
    /// Nothing here fails startup: a read fault or missing blob seeds a
    /// new player, a malformed blob falls back the same way, and a parsed
    /// state is sanitized before use. A freshly seeded state is written
    /// back immediately so the next launch finds it.
    pub async fn load(&self) {
        let blob = match self.storage.get(&self.cfg.snapshot_key).await {
            Ok(blob) => blob,
            Err(e) => {
                warn!(error = %e, "Snapshot read failed, treating as absent");
                None
            }
        };

        let (mut state, mut fresh) = match blob {
            Some(blob) => match serde_json::from_str::<GameState>(&blob) {
                Ok(state) => (state, false),
                Err(e) => {
                    warn!(error = %e, "Snapshot unreadable, seeding new player state");
                    (GameState::new_player(), true)
                }
            },
            None => {
                info!("No saved state found, seeding new player state");
                (GameState::new_player(), true)
            }
        };

        state.sanitize();
        if state.beings.is_empty() {
            // Inventory must never be empty; restore the starter.
            state.beings.push(crate::state::Being::starter());
            fresh = true;
        }
        self.state.replace(state);

        if fresh {
            if let Err(e) = self.save().await {
                error!(error = %e, "Could not persist freshly seeded state");
            }
        }
    }

    /// Serialize the current state and write it, coalescing overlap.
    ///
    /// If a write is already in flight this only marks it pending and
    /// returns; the in-flight writer picks the newer state up in its drain
    /// loop. The snapshot is taken after entering the saving state, so the
    /// written blob is never older than the request that triggered it.
    pub async fn save(&self) -> Result<(), StoreError> {
        {
            let mut guard = self.save_state();
            match *guard {
                SaveState::Saving { .. } => {
                    *guard = SaveState::Saving { pending: true };
                    debug!("Save already in flight, queued follow-up");
                    return Ok(());
                }
                SaveState::Idle => *guard = SaveState::Saving { pending: false },
            }
        }

        loop {
            let mut snapshot = self.state.snapshot();
            snapshot.saved_at = Some(chrono::Utc::now());
            let result = async {
                let blob = serde_json::to_string(&snapshot)?;
                self.storage.set(&self.cfg.snapshot_key, &blob).await?;
                Ok::<_, StoreError>(())
            }
            .await;

            let mut guard = self.save_state();
            if let Err(e) = result {
                *guard = SaveState::Idle;
                return Err(e);
            }
            match *guard {
                SaveState::Saving { pending: true } => {
                    *guard = SaveState::Saving { pending: false };
                }
                _ => {
                    *guard = SaveState::Idle;
                    debug!("State snapshot persisted");
                    return Ok(());
                }
            }
        }
    }

    /// Schedule a save after the debounce window; a newer request restarts
    /// the window, so a mutation burst costs one write.
    ///
    /// Superseded requests are cancelled by a generation check after the
    /// sleep, never by aborting the task: a `save()` that has begun always
    /// runs to completion, otherwise the save lock would be left held.
    pub fn request_save(self: &Arc<Self>) {
        let generation = self.debounce_gen.fetch_add(1, Ordering::SeqCst) + 1;
        let store = Arc::clone(self);
        let delay = Duration::from_millis(self.cfg.save_debounce_ms);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if store.debounce_gen.load(Ordering::SeqCst) != generation {
                // A newer request or a flush owns the window now.
                return;
            }
            if let Err(e) = store.save().await {
                error!(error = %e, "Debounced save failed");
            }
        });
    }

    /// Invalidate any pending debounce and write now. Used on teardown.
    pub async fn flush(&self) -> Result<(), StoreError> {
        self.debounce_gen.fetch_add(1, Ordering::SeqCst);
        self.save().await
    }

    /// Replace the in-memory state with a fresh player. Nothing is written;
    /// the caller decides whether the reset becomes durable.
    pub fn reset(&self) {
        info!("Resetting in-memory state");
        self.state.replace(GameState::new_player());
    }

    // ---- Embedded key mirror --------------------------------------------

    fn mirror_key(key: &str) -> String {
        format!("{EMBEDDED_PREFIX}{key}")
    }

    /// Persist an embedded-origin value under the mirror namespace and
    /// stamp its last-synchronized time.
    pub async fn mirror_embedded_key(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        let blob = serde_json::to_string(value)?;
        self.storage.set(&Self::mirror_key(key), &blob).await?;
        self.touch_last_sync(key).await?;
        debug!(key, "Mirrored embedded key");
        Ok(())
    }

    pub async fn read_embedded_key(&self, key: &str) -> Result<Option<Value>, StoreError> {
        match self.storage.get(&Self::mirror_key(key)).await? {
            Some(blob) => match serde_json::from_str(&blob) {
                Ok(value) => Ok(Some(value)),
                Err(e) => {
                    warn!(key, error = %e, "Mirrored value unreadable, treating as absent");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// All mirrored entries with the namespace prefix stripped, for pushing
    /// host-held state back down on hydration.
    pub async fn collect_embedded(&self) -> Result<Vec<(String, Value)>, StoreError> {
        let mut entries = Vec::new();
        for key in self.storage.get_all_keys().await? {
            let Some(base) = key.strip_prefix(EMBEDDED_PREFIX) else {
                continue;
            };
            if let Some(blob) = self.storage.get(&key).await? {
                match serde_json::from_str(&blob) {
                    Ok(value) => entries.push((base.to_string(), value)),
                    Err(e) => warn!(key, error = %e, "Skipping unreadable mirrored value"),
                }
            }
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    /// Remove every mirrored key and the last-sync map.
    pub async fn clear_embedded(&self) -> Result<(), StoreError> {
        let mirrored: Vec<String> = self
            .storage
            .get_all_keys()
            .await?
            .into_iter()
            .filter(|k| k.starts_with(EMBEDDED_PREFIX))
            .collect();
        if !mirrored.is_empty() {
            info!(count = mirrored.len(), "Clearing mirrored embedded keys");
            self.storage.multi_remove(&mirrored).await?;
        }
        self.storage.remove(&self.cfg.last_sync_key).await?;
        Ok(())
    }

    async fn touch_last_sync(&self, key: &str) -> Result<(), StoreError> {
        let mut map: std::collections::BTreeMap<String, i64> =
            match self.storage.get(&self.cfg.last_sync_key).await? {
                Some(blob) => serde_json::from_str(&blob).unwrap_or_default(),
                None => Default::default(),
            };
        map.insert(key.to_string(), chrono::Utc::now().timestamp_millis());
        let blob = serde_json::to_string(&map)?;
        self.storage.set(&self.cfg.last_sync_key, &blob).await?;
        Ok(())
    }

    pub async fn last_sync(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let map: std::collections::BTreeMap<String, i64> =
            match self.storage.get(&self.cfg.last_sync_key).await? {
                Some(blob) => serde_json::from_str(&blob).unwrap_or_default(),
                None => return Ok(None),
            };
        Ok(map.get(key).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn store() -> Arc<DurableStateStore> {
        Arc::new(DurableStateStore::new(
            Arc::new(MemoryStorage::new()),
            Arc::new(StateContainer::default()),
            StoreConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_load_seeds_new_player_and_persists() {
        let store = store();
        store.load().await;

        store.state().read(|s| {
            assert!(s.user.id.starts_with("player_"));
            assert_eq!(s.beings.len(), 1);
            assert_eq!(s.user.consciousness_points, 100);
        });

        // The seed was written back.
        let blob = store.storage.get("game_state").await.unwrap();
        assert!(blob.is_some());
    }

    #[tokio::test]
    async fn test_load_survives_corrupt_snapshot() {
        let store = store();
        store.storage.set("game_state", "{ not json").await.unwrap();
        store.load().await;
        store.state().read(|s| assert_eq!(s.user.level, 1));
    }

    #[tokio::test]
    async fn test_mirror_and_collect_roundtrip() {
        let store = store();
        store
            .mirror_embedded_key("bookmarks", &serde_json::json!(["b1"]))
            .await
            .unwrap();
        store
            .mirror_embedded_key("current_book", &serde_json::json!("manual-practico"))
            .await
            .unwrap();

        let entries = store.collect_embedded().await.unwrap();
        let keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["bookmarks", "current_book"]);

        assert!(store.last_sync("bookmarks").await.unwrap().is_some());

        store.clear_embedded().await.unwrap();
        assert!(store.collect_embedded().await.unwrap().is_empty());
        assert!(store.last_sync("bookmarks").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reset_reseeds_identity_without_writing() {
        let store = store();
        store.load().await;
        let first_id = store.state().read(|s| s.user.id.clone());
        let blob_before = store.storage.get("game_state").await.unwrap();

        store.reset();
        let second_id = store.state().read(|s| s.user.id.clone());
        assert_ne!(first_id, second_id);

        // The persisted blob is untouched until the next save.
        let blob_after = store.storage.get("game_state").await.unwrap();
        assert_eq!(blob_before, blob_after);
    }
}
