//! Durable game-state model
//!
//! The whole of this structure is the unit of durable persistence: there is
//! no per-field storage. Loading is lenient — missing fields default,
//! malformed collection entries are dropped, numeric fields are clamped —
//! so a damaged blob degrades instead of crashing startup.

pub mod container;

use chrono::{DateTime, Utc};
use serde::de::{Deserializer, Error as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub use container::StateContainer;

/// Hard ceiling on accumulating counters (matches the host UI's display range).
pub const COUNTER_CAP: i64 = 999_999;

/// Progression tiers: (level, xp required, max beings, max energy).
const LEVEL_TIERS: &[(i64, i64, i64, i64)] = &[
    (1, 0, 5, 100),
    (2, 100, 7, 120),
    (3, 250, 10, 150),
    (4, 500, 12, 170),
    (5, 850, 15, 200),
    (6, 1_300, 18, 230),
    (7, 1_900, 20, 260),
    (8, 2_600, 23, 290),
    (10, 4_200, 28, 350),
    (12, 6_500, 33, 400),
    (15, 10_000, 40, 480),
    (18, 15_000, 48, 560),
    (20, 20_000, 55, 620),
    (25, 32_000, 70, 750),
    (30, 48_000, 85, 880),
    (40, 75_000, 110, 1_100),
    (50, 100_000, 150, 1_500),
];

/// The tier row a given xp total puts the user on.
pub fn tier_for_xp(xp: i64) -> (i64, i64, i64, i64) {
    let mut row = LEVEL_TIERS[0];
    for tier in LEVEL_TIERS {
        if xp >= tier.1 {
            row = *tier;
        } else {
            break;
        }
    }
    row
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UserState {
    pub id: String,
    pub username: String,
    pub level: i64,
    pub xp: i64,
    pub energy: i64,
    pub max_energy: i64,
    pub consciousness_points: i64,
    pub max_beings: i64,
    pub stats: LifetimeStats,
}

impl Default for UserState {
    fn default() -> Self {
        Self {
            id: String::new(),
            username: String::new(),
            level: 1,
            xp: 0,
            energy: 100,
            max_energy: 100,
            consciousness_points: 0,
            max_beings: 5,
            stats: LifetimeStats::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LifetimeStats {
    pub crises_resolved: i64,
    pub fractals_collected: i64,
    pub missions_completed: i64,
    pub beings_created: i64,
    pub created_at: Option<DateTime<Utc>>,
}

/// An owned entity in the host inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Being {
    pub id: String,
    pub name: String,
    pub avatar: String,
    pub status: String,
    pub level: i64,
    pub experience: i64,
    pub attributes: BTreeMap<String, i64>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Default for Being {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            avatar: "🌱".to_string(),
            status: "available".to_string(),
            level: 1,
            experience: 0,
            attributes: BTreeMap::new(),
            created_at: None,
        }
    }
}

/// An attribute fragment earned through reading rewards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Piece {
    pub attribute: String,
    pub obtained_at: DateTime<Utc>,
}

/// Reading-side statistics and the durable streak counter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadingStats {
    pub chapters_read: i64,
    pub time_spent_secs: i64,
    pub xp_earned: i64,
    pub total_reading_time_secs: i64,
    pub last_session_at: Option<DateTime<Utc>>,
    pub streak: Option<crate::rewards::StreakState>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GameState {
    pub user: UserState,
    #[serde(deserialize_with = "lenient_vec")]
    pub beings: Vec<Being>,
    #[serde(deserialize_with = "lenient_vec")]
    pub pieces: Vec<Piece>,
    pub communities: Vec<Value>,
    pub settings: BTreeMap<String, Value>,
    pub reading: ReadingStats,
    /// One opaque sub-state object per gameplay subsystem, each
    /// independently optional and independently defaulted.
    pub subsystems: BTreeMap<String, Value>,
    pub saved_at: Option<DateTime<Utc>>,
}

impl Default for GameState {
    fn default() -> Self {
        Self {
            user: UserState::default(),
            beings: Vec::new(),
            pieces: Vec::new(),
            communities: Vec::new(),
            settings: BTreeMap::new(),
            reading: ReadingStats::default(),
            subsystems: BTreeMap::new(),
            saved_at: None,
        }
    }
}

impl GameState {
    /// Fresh first-run state: generated identity plus the starter being.
    pub fn new_player() -> Self {
        let mut state = Self::default();
        state.user.id = format!("player_{}", uuid::Uuid::new_v4());
        state.user.username = "Nuevo Ser".to_string();
        state.user.consciousness_points = 100;
        state.user.stats.created_at = Some(Utc::now());
        state.user.stats.beings_created = 1;
        state.beings.push(Being::starter());
        state
    }

    /// Clamp numeric fields to their invariants and drop inventory entries
    /// without an identity. Called once after every load.
    pub fn sanitize(&mut self) {
        let u = &mut self.user;
        u.level = u.level.max(1);
        u.xp = u.xp.clamp(0, COUNTER_CAP);
        u.max_energy = u.max_energy.max(100);
        u.energy = u.energy.clamp(0, u.max_energy);
        u.consciousness_points = u.consciousness_points.clamp(0, COUNTER_CAP);
        u.max_beings = u.max_beings.max(1);
        u.stats.crises_resolved = u.stats.crises_resolved.max(0);
        u.stats.fractals_collected = u.stats.fractals_collected.max(0);
        u.stats.missions_completed = u.stats.missions_completed.max(0);
        u.stats.beings_created = u.stats.beings_created.max(0);

        self.beings.retain(|b| !b.id.is_empty());
        for being in &mut self.beings {
            being.level = being.level.max(1);
            being.experience = being.experience.max(0);
        }

        let r = &mut self.reading;
        r.chapters_read = r.chapters_read.max(0);
        r.time_spent_secs = r.time_spent_secs.max(0);
        r.xp_earned = r.xp_earned.max(0);
        r.total_reading_time_secs = r.total_reading_time_secs.max(0);
        if let Some(streak) = &mut r.streak {
            streak.current = streak.current.max(1);
            streak.longest = streak.longest.max(streak.current);
        }
    }
}

impl Being {
    /// The seed entity every inventory must contain at least once.
    pub fn starter() -> Self {
        let attributes = [
            ("reflection", 25),
            ("analysis", 20),
            ("creativity", 30),
            ("empathy", 35),
            ("communication", 25),
            ("leadership", 15),
            ("action", 20),
            ("resilience", 25),
            ("strategy", 15),
            ("consciousness", 40),
            ("connection", 30),
            ("wisdom", 20),
            ("organization", 15),
            ("collaboration", 25),
            ("technical", 10),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            id: format!("being_starter_{}", uuid::Uuid::new_v4()),
            name: "Primer Despertar".to_string(),
            avatar: "🌱".to_string(),
            status: "available".to_string(),
            level: 1,
            experience: 0,
            attributes,
            created_at: Some(Utc::now()),
        }
    }
}

/// Deserialize a sequence keeping only the entries that parse; a single
/// malformed element never poisons the whole collection.
fn lenient_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let raw: Vec<Value> = Vec::deserialize(deserializer).map_err(D::Error::custom)?;
    Ok(raw
        .into_iter()
        .filter_map(|v| serde_json::from_value(v).ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_lookup() {
        assert_eq!(tier_for_xp(0).0, 1);
        assert_eq!(tier_for_xp(99).0, 1);
        assert_eq!(tier_for_xp(100).0, 2);
        assert_eq!(tier_for_xp(4_199).0, 8);
        assert_eq!(tier_for_xp(100_000).0, 50);
    }

    #[test]
    fn test_sanitize_clamps_numeric_fields() {
        let mut state = GameState::default();
        state.user.level = 0;
        state.user.xp = -50;
        state.user.energy = 5_000;
        state.user.consciousness_points = 2_000_000;
        state.sanitize();

        assert_eq!(state.user.level, 1);
        assert_eq!(state.user.xp, 0);
        assert_eq!(state.user.energy, state.user.max_energy);
        assert_eq!(state.user.consciousness_points, COUNTER_CAP);
    }

    #[test]
    fn test_sanitize_drops_beings_without_identity() {
        let mut state = GameState::default();
        state.beings.push(Being::starter());
        state.beings.push(Being::default()); // empty id
        state.sanitize();

        assert_eq!(state.beings.len(), 1);
    }

    #[test]
    fn test_lenient_collection_parse() {
        let blob = serde_json::json!({
            "user": { "id": "player_x", "level": 3 },
            "beings": [
                { "id": "b1", "name": "Keeper" },
                42,
                { "name": "no id but still parses via default" }
            ]
        });

        let mut state: GameState = serde_json::from_value(blob).unwrap();
        state.sanitize();

        // The number is dropped at parse, the id-less entry at sanitize.
        assert_eq!(state.beings.len(), 1);
        assert_eq!(state.user.level, 3);
        assert_eq!(state.user.xp, 0);
    }
}
