//! Bridge wire protocol
//!
//! Messages cross the host/embedded boundary as one JSON envelope:
//! `{ "type": "...", "data": {...}, "timestamp": ... }`. Parsing is
//! two-phase: the envelope first, then per-type payload validation. An
//! unknown type is not an error — the embedded side ships independently
//! and may speak a newer dialect.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed envelope: {0}")]
    Envelope(#[from] serde_json::Error),

    #[error("Malformed {message_type} payload: {reason}")]
    Payload {
        message_type: String,
        reason: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel closed")]
    Closed,

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Outbound transport seam. The hosting platform injects the real channel
/// (a webview evaluator, a socket); tests inject a recording fake.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    async fn post(&self, payload: String) -> Result<(), ChannelError>;
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    message_type: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    #[allow(dead_code)]
    timestamp: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChapterRef {
    #[serde(alias = "bookId")]
    pub book_id: String,
    #[serde(alias = "chapterId")]
    pub chapter_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgressUpdate {
    #[serde(alias = "bookId")]
    pub book_id: String,
    #[serde(alias = "chapterId")]
    pub chapter_id: String,
    #[serde(default)]
    pub progress: f64,
    #[serde(default, alias = "timeSpent")]
    pub time_spent: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChapterCompleted {
    #[serde(alias = "bookId")]
    pub book_id: String,
    #[serde(alias = "chapterId")]
    pub chapter_id: String,
    #[serde(default, alias = "chapterTitle")]
    pub chapter_title: String,
    #[serde(default, alias = "totalTime")]
    pub total_time: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookmarkAdded {
    #[serde(alias = "bookId")]
    pub book_id: String,
    #[serde(flatten)]
    pub bookmark: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuizCompleted {
    #[serde(alias = "quizId")]
    pub quiz_id: String,
    pub score: i64,
    #[serde(alias = "totalQuestions")]
    pub total_questions: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NoteCreated {
    #[serde(alias = "bookId")]
    pub book_id: String,
    #[serde(alias = "chapterId")]
    pub chapter_id: String,
    #[serde(flatten)]
    pub note: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageKeyChanged {
    pub key: String,
    #[serde(default)]
    pub value: Value,
}

/// One fully validated inbound message.
#[derive(Debug)]
pub enum InboundMessage {
    EmbeddedReady,
    ChapterOpened(ChapterRef),
    ProgressUpdated(ProgressUpdate),
    ChapterCompleted(ChapterCompleted),
    BookmarkAdded(BookmarkAdded),
    QuizCompleted(QuizCompleted),
    NoteCreated(NoteCreated),
    StorageKeyChanged(StorageKeyChanged),
    SyncRequest,
    ForceSync,
    /// Full key/value dump from the embedded side.
    SyncSnapshot(BTreeMap<String, Value>),
    Unknown(String),
}

impl InboundMessage {
    /// Parse one raw message off the channel.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(raw)?;
        let payload = |reason: serde_json::Error| ProtocolError::Payload {
            message_type: envelope.message_type.clone(),
            reason: reason.to_string(),
        };

        Ok(match envelope.message_type.as_str() {
            "EMBEDDED_READY" => Self::EmbeddedReady,
            "CHAPTER_OPENED" => {
                Self::ChapterOpened(serde_json::from_value(envelope.data).map_err(payload)?)
            }
            "PROGRESS_UPDATED" => {
                Self::ProgressUpdated(serde_json::from_value(envelope.data).map_err(payload)?)
            }
            "CHAPTER_COMPLETED" => {
                Self::ChapterCompleted(serde_json::from_value(envelope.data).map_err(payload)?)
            }
            "BOOKMARK_ADDED" => {
                Self::BookmarkAdded(serde_json::from_value(envelope.data).map_err(payload)?)
            }
            "QUIZ_COMPLETED" => {
                Self::QuizCompleted(serde_json::from_value(envelope.data).map_err(payload)?)
            }
            "NOTE_CREATED" => {
                Self::NoteCreated(serde_json::from_value(envelope.data).map_err(payload)?)
            }
            "STORAGE_KEY_CHANGED" => {
                Self::StorageKeyChanged(serde_json::from_value(envelope.data).map_err(payload)?)
            }
            "SYNC_REQUEST" => Self::SyncRequest,
            "FORCE_SYNC" => Self::ForceSync,
            "SYNC_SNAPSHOT" => {
                Self::SyncSnapshot(serde_json::from_value(envelope.data).map_err(payload)?)
            }
            other => Self::Unknown(other.to_string()),
        })
    }
}

/// Host-to-embedded messages.
#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum OutboundMessage {
    #[serde(rename = "SYNC_REQUEST")]
    SyncRequest,
    #[serde(rename = "FORCE_SYNC")]
    ForceSync,
    /// Hydration payload: mirrored entries keyed by their base names.
    #[serde(rename = "SYNC_PUSH")]
    SyncPush { entries: BTreeMap<String, Value> },
}

impl OutboundMessage {
    /// Serialize with the envelope timestamp attached.
    pub fn to_wire(&self) -> String {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Some(obj) = value.as_object_mut() {
            obj.insert(
                "timestamp".to_string(),
                Value::from(chrono::Utc::now().timestamp_millis()),
            );
        }
        value.to_string()
    }
}
