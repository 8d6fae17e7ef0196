//! Engine configuration

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub store: StoreConfig,
    pub scheduler: SchedulerConfig,
    pub rewards: RewardConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Quiet period collapsing bursts of save requests into one write
    #[serde(default = "default_debounce")]
    pub save_debounce_ms: u64,

    /// Storage key holding the entire durable snapshot
    #[serde(default = "default_snapshot_key")]
    pub snapshot_key: String,

    /// Storage key holding the per-key last-synchronized-at map
    #[serde(default = "default_last_sync_key")]
    pub last_sync_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Interval between SYNC_REQUEST pushes while the screen is visible
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardConfig {
    /// Base xp for one completed chapter
    #[serde(default = "default_chapter_base_xp")]
    pub chapter_base_xp: i64,

    /// Engagement bonus: 1 xp per minute read, capped here
    #[serde(default = "default_time_bonus_cap")]
    pub time_bonus_cap_xp: i64,

    /// Xp per consecutive reading day
    #[serde(default = "default_streak_unit")]
    pub streak_unit_xp: i64,

    /// Attribute fragments per newly completed chapter
    #[serde(default = "default_fragments_per_chapter")]
    pub fragments_per_chapter: i64,

    /// Bonus for a 100% quiz score
    #[serde(default = "default_quiz_bonus")]
    pub quiz_perfect_bonus_xp: i64,
}

// Defaults
fn default_debounce() -> u64 { 500 }
fn default_snapshot_key() -> String { "game_state".to_string() }
fn default_last_sync_key() -> String { "sync_last_sync".to_string() }
fn default_sync_interval() -> u64 { 30 }
fn default_chapter_base_xp() -> i64 { 50 }
fn default_time_bonus_cap() -> i64 { 30 }
fn default_streak_unit() -> i64 { 5 }
fn default_fragments_per_chapter() -> i64 { 2 }
fn default_quiz_bonus() -> i64 { 20 }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            save_debounce_ms: default_debounce(),
            snapshot_key: default_snapshot_key(),
            last_sync_key: default_last_sync_key(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: default_sync_interval(),
        }
    }
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            chapter_base_xp: default_chapter_base_xp(),
            time_bonus_cap_xp: default_time_bonus_cap(),
            streak_unit_xp: default_streak_unit(),
            fragments_per_chapter: default_fragments_per_chapter(),
            quiz_perfect_bonus_xp: default_quiz_bonus(),
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document; missing sections and fields take defaults.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}
