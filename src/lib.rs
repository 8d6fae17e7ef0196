//! Two-tier state engine for a gamified reading app.
//!
//! The host application owns a durable [`state::GameState`]; an embedded
//! interactive document owns its own working data and speaks to the host
//! over a JSON message channel. This crate keeps the two sides consistent:
//! it classifies which keys cross the boundary ([`registry`]), mirrors
//! embedded data into host storage ([`store`] over [`storage`]), converts
//! reading activity into rewards exactly once ([`rewards`]), and drives the
//! whole exchange from the message loop ([`bridge`]).

pub mod bridge;
pub mod config;
pub mod registry;
pub mod rewards;
pub mod state;
pub mod storage;
pub mod store;

pub use bridge::{BridgeLifecycle, EmbeddedBridge};
pub use config::EngineConfig;
pub use registry::{KeyScope, SyncKeyRegistry};
pub use state::{GameState, StateContainer};
pub use storage::{KeyValueStorage, MemoryStorage, SqliteStorage, StorageError};
pub use store::{DurableStateStore, StoreError};
