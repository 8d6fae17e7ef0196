//! Embedded content bridge
//!
//! Receives raw messages from the embedded reading document, validates
//! them, and turns them into durable state changes and rewards. The bridge
//! is deliberately hard to kill: malformed input, unknown message types
//! and storage faults are logged and dropped, never propagated to the
//! channel owner.

pub mod protocol;
pub mod scheduler;

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::config::{EngineConfig, RewardConfig};
use crate::registry::SyncKeyRegistry;
use crate::rewards;
use crate::store::{DurableStateStore, StoreError};

use protocol::{
    BookmarkAdded, ChapterCompleted, ChapterRef, InboundMessage, MessageChannel, NoteCreated,
    OutboundMessage, ProgressUpdate, QuizCompleted, StorageKeyChanged,
};
use scheduler::AutoSyncScheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeLifecycle {
    /// Channel exists, embedded side has not announced itself.
    NotReady,
    /// Ready announcement received, hydration in progress.
    Ready,
    /// Normal message flow.
    Active,
    /// A batch reconciliation is running.
    Syncing,
    /// Torn down; all further input is ignored.
    TornDown,
}

pub struct EmbeddedBridge {
    store: Arc<DurableStateStore>,
    channel: Arc<dyn MessageChannel>,
    registry: SyncKeyRegistry,
    scheduler: AutoSyncScheduler,
    rewards: RewardConfig,
    lifecycle: Mutex<BridgeLifecycle>,
}

impl EmbeddedBridge {
    pub fn new(
        store: Arc<DurableStateStore>,
        channel: Arc<dyn MessageChannel>,
        cfg: &EngineConfig,
    ) -> Self {
        Self {
            store,
            channel,
            registry: SyncKeyRegistry::default(),
            scheduler: AutoSyncScheduler::new(cfg.scheduler.clone()),
            rewards: cfg.rewards.clone(),
            lifecycle: Mutex::new(BridgeLifecycle::NotReady),
        }
    }

    pub fn lifecycle(&self) -> BridgeLifecycle {
        *self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_lifecycle(&self, next: BridgeLifecycle) {
        *self.lifecycle.lock().unwrap_or_else(|e| e.into_inner()) = next;
    }

    /// Entry point for raw channel input. Never fails: bad input is logged
    /// and dropped so one hostile or buggy message cannot take the bridge
    /// down.
    pub async fn handle_raw(self: &Arc<Self>, raw: &str) {
        if self.lifecycle() == BridgeLifecycle::TornDown {
            warn!("Message after teardown ignored");
            return;
        }

        let message = match InboundMessage::parse(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Dropping malformed message");
                return;
            }
        };

        if let Err(e) = self.dispatch(message).await {
            error!(error = %e, "Message handling failed");
        }
    }

    async fn dispatch(self: &Arc<Self>, message: InboundMessage) -> Result<(), StoreError> {
        match message {
            InboundMessage::EmbeddedReady => self.on_ready().await,
            InboundMessage::ChapterOpened(chapter) => self.on_chapter_opened(chapter).await,
            InboundMessage::ProgressUpdated(update) => self.on_progress(update).await,
            InboundMessage::ChapterCompleted(completed) => {
                self.on_chapter_completed(completed).await
            }
            InboundMessage::BookmarkAdded(bookmark) => self.on_bookmark(bookmark).await,
            InboundMessage::NoteCreated(note) => self.on_note(note).await,
            InboundMessage::QuizCompleted(quiz) => self.on_quiz(quiz).await,
            InboundMessage::StorageKeyChanged(change) => self.on_key_changed(change).await,
            InboundMessage::SyncRequest | InboundMessage::ForceSync => self.push_hydrate().await,
            InboundMessage::SyncSnapshot(snapshot) => self.on_snapshot(snapshot).await,
            InboundMessage::Unknown(message_type) => {
                debug!(message_type, "Ignoring unknown message type");
                Ok(())
            }
        }
    }

    // ---- Handlers --------------------------------------------------------

    async fn on_ready(self: &Arc<Self>) -> Result<(), StoreError> {
        info!("Embedded content ready");
        self.set_lifecycle(BridgeLifecycle::Ready);
        self.push_hydrate().await?;
        self.scheduler.start(Arc::clone(&self.channel));
        Ok(())
    }

    /// Push everything the host holds for the embedded side: all mirrored
    /// entries plus a projection of the host identity.
    async fn push_hydrate(self: &Arc<Self>) -> Result<(), StoreError> {
        self.set_lifecycle(BridgeLifecycle::Syncing);

        let mut entries: std::collections::BTreeMap<String, Value> =
            self.store.collect_embedded().await?.into_iter().collect();

        let auth_user = self.store.state().read(|s| {
            json!({
                "id": s.user.id,
                "username": s.user.username,
                "level": s.user.level,
                "xp": s.user.xp,
            })
        });
        entries.insert("auth_user".to_string(), auth_user);

        let count = entries.len();
        let wire = OutboundMessage::SyncPush { entries }.to_wire();
        if let Err(e) = self.channel.post(wire).await {
            warn!(error = %e, "Hydrate push failed");
        } else {
            info!(count, "Hydrated embedded content");
        }

        self.set_lifecycle(BridgeLifecycle::Active);
        Ok(())
    }

    /// Track the reading position so a fresh embedded session can resume it.
    async fn on_chapter_opened(self: &Arc<Self>, chapter: ChapterRef) -> Result<(), StoreError> {
        info!(
            book_id = %chapter.book_id,
            chapter_id = %chapter.chapter_id,
            "Chapter opened"
        );
        let value = json!({
            "book_id": chapter.book_id,
            "chapter_id": chapter.chapter_id,
            "opened_at": chrono::Utc::now().timestamp_millis(),
        });
        self.store.mirror_embedded_key("current_book", &value).await?;
        self.store.request_save();
        Ok(())
    }

    async fn on_progress(self: &Arc<Self>, update: ProgressUpdate) -> Result<(), StoreError> {
        let key = format!("reading_progress_{}_{}", update.book_id, update.chapter_id);
        let value = json!({
            "progress": update.progress,
            "time_spent": update.time_spent,
        });
        self.store.mirror_embedded_key(&key, &value).await?;
        self.store.state().update_reading_progress();
        self.store.request_save();
        Ok(())
    }

    async fn on_chapter_completed(
        self: &Arc<Self>,
        completed: ChapterCompleted,
    ) -> Result<(), StoreError> {
        let today = chrono::Utc::now().date_naive();
        let streak = rewards::advance_streak(self.store.state().streak().as_ref(), today);
        let xp = rewards::chapter_reward(&self.rewards, completed.total_time, streak.current);

        info!(
            book_id = %completed.book_id,
            chapter_id = %completed.chapter_id,
            chapter_title = %completed.chapter_title,
            xp,
            streak = streak.current,
            "Chapter completed"
        );

        let state = self.store.state();
        state.set_streak(streak);
        state.add_xp(xp);
        state.add_fragments(&rewards::fragment_attributes(
            &completed.book_id,
            self.rewards.fragments_per_chapter,
        ));
        state.record_chapter_read(completed.total_time, xp);

        // Mark it completed in the mirrored snapshot so a later batch dump
        // never rewards this chapter a second time.
        self.mark_chapter_completed(&completed).await?;

        self.store.request_save();
        Ok(())
    }

    async fn mark_chapter_completed(&self, completed: &ChapterCompleted) -> Result<(), StoreError> {
        let mirrored = self
            .store
            .read_embedded_key("reading_progress")
            .await?
            .unwrap_or_else(|| json!({}));
        let mut snapshot = rewards::parse_progress(&mirrored);

        let entry = snapshot
            .entry(completed.book_id.clone())
            .or_default()
            .entry(completed.chapter_id.clone())
            .or_default();
        entry.completed = true;
        entry.progress = 1.0;
        entry.time_spent = entry.time_spent.max(completed.total_time);

        let value = serde_json::to_value(&snapshot)?;
        self.store.mirror_embedded_key("reading_progress", &value).await
    }

    async fn on_bookmark(self: &Arc<Self>, bookmark: BookmarkAdded) -> Result<(), StoreError> {
        let key = format!("bookmarks_{}", bookmark.book_id);
        self.append_mirrored(&key, serde_json::to_value(&bookmark.bookmark)?)
            .await?;
        self.store.request_save();
        Ok(())
    }

    async fn on_note(self: &Arc<Self>, note: NoteCreated) -> Result<(), StoreError> {
        let key = format!("notes_{}_{}", note.book_id, note.chapter_id);
        self.append_mirrored(&key, serde_json::to_value(&note.note)?)
            .await?;
        self.store.request_save();
        Ok(())
    }

    /// Append one element to a mirrored JSON list, creating it on first use.
    async fn append_mirrored(&self, key: &str, element: Value) -> Result<(), StoreError> {
        let mut list = match self.store.read_embedded_key(key).await? {
            Some(Value::Array(list)) => list,
            Some(_) | None => Vec::new(),
        };
        list.push(element);
        self.store
            .mirror_embedded_key(key, &Value::Array(list))
            .await
    }

    async fn on_quiz(self: &Arc<Self>, quiz: QuizCompleted) -> Result<(), StoreError> {
        let key = format!("quiz_results_{}", quiz.quiz_id);
        let value = json!({
            "score": quiz.score,
            "total_questions": quiz.total_questions,
            "completed_at": chrono::Utc::now().timestamp_millis(),
        });
        self.store.mirror_embedded_key(&key, &value).await?;

        let bonus = rewards::quiz_reward(&self.rewards, quiz.score, quiz.total_questions);
        if bonus > 0 {
            info!(quiz_id = %quiz.quiz_id, bonus, "Perfect quiz score");
            self.store.state().add_xp(bonus);
        }

        self.store.request_save();
        Ok(())
    }

    async fn on_key_changed(self: &Arc<Self>, change: StorageKeyChanged) -> Result<(), StoreError> {
        if !self.registry.is_mirrored(&change.key) {
            debug!(key = %change.key, "Key not mirrored, ignoring change");
            return Ok(());
        }

        if change.key == "reading_progress" {
            let rewarded = self.reconcile_progress(&change.value).await?;
            if rewarded {
                self.store.request_save();
            }
            return Ok(());
        }

        self.store.mirror_embedded_key(&change.key, &change.value).await
    }

    async fn on_snapshot(
        self: &Arc<Self>,
        snapshot: std::collections::BTreeMap<String, Value>,
    ) -> Result<(), StoreError> {
        self.set_lifecycle(BridgeLifecycle::Syncing);
        debug!(keys = snapshot.len(), "Reconciling embedded snapshot");

        for (key, value) in &snapshot {
            if !self.registry.is_mirrored(key) {
                debug!(key = %key, "Skipping non-mirrored snapshot key");
                continue;
            }
            match key.as_str() {
                "reading_progress" => {
                    self.reconcile_progress(value).await?;
                }
                "reading_time" => {
                    self.store.mirror_embedded_key(key, value).await?;
                    let total = value
                        .get("total")
                        .and_then(Value::as_i64)
                        .or_else(|| value.as_i64());
                    if let Some(total) = total {
                        self.store.state().update_statistics(total);
                    }
                }
                _ => {
                    self.store.mirror_embedded_key(key, value).await?;
                }
            }
        }

        self.set_lifecycle(BridgeLifecycle::Active);
        self.store.request_save();
        Ok(())
    }

    /// Batch-reconcile a full progress value against the previously
    /// mirrored one. The old value is read before the new one is written,
    /// which is what makes replays grant nothing. Returns whether any
    /// reward was applied.
    async fn reconcile_progress(&self, value: &Value) -> Result<bool, StoreError> {
        let old = self
            .store
            .read_embedded_key("reading_progress")
            .await?
            .map(|v| rewards::parse_progress(&v))
            .unwrap_or_default();
        let new = rewards::parse_progress(value);

        let outcome = rewards::diff_progress(&self.rewards, &old, &new);

        self.store
            .mirror_embedded_key("reading_progress", value)
            .await?;

        if outcome.delta == rewards::RewardDelta::default() {
            return Ok(false);
        }

        info!(
            xp = outcome.delta.xp,
            fragments = outcome.delta.fragments,
            books = outcome.newly_completed.len(),
            "Batch reconciliation granted rewards"
        );

        let state = self.store.state();
        state.add_xp(outcome.delta.xp);
        for (book_id, chapters) in &outcome.newly_completed {
            for _ in chapters {
                state.add_fragments(&rewards::fragment_attributes(
                    book_id,
                    self.rewards.fragments_per_chapter,
                ));
            }
        }
        Ok(true)
    }

    /// Stop timers and refuse further input. Persisted state stays; a save
    /// still in flight completes harmlessly.
    pub async fn teardown(&self) {
        info!("Tearing down bridge");
        self.scheduler.stop();
        if let Err(e) = self.store.flush().await {
            error!(error = %e, "Final flush failed");
        }
        self.set_lifecycle(BridgeLifecycle::TornDown);
    }

    pub fn scheduler(&self) -> &AutoSyncScheduler {
        &self.scheduler
    }
}
