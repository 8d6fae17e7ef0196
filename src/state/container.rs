//! Reactive state container
//!
//! Owns the in-memory [`GameState`] and is the only place it gets mutated.
//! Cross-component writes go through named, intention-revealing mutators
//! that validate their input at the boundary; a violated invariant is
//! logged and the state is left untouched. Observers watch a revision
//! counter rather than the state itself.

use std::sync::RwLock;
use tokio::sync::watch;
use tracing::{info, warn};

use super::{tier_for_xp, GameState, Piece, COUNTER_CAP};
use crate::rewards::StreakState;

pub struct StateContainer {
    state: RwLock<GameState>,
    revision: watch::Sender<u64>,
}

impl StateContainer {
    pub fn new(state: GameState) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            state: RwLock::new(state),
            revision,
        }
    }

    /// Observe state changes; the value is a monotonically increasing
    /// revision counter.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn read<R>(&self, f: impl FnOnce(&GameState) -> R) -> R {
        f(&self.state.read().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn snapshot(&self) -> GameState {
        self.read(|s| s.clone())
    }

    /// Replace the whole state (load / reset paths).
    pub fn replace(&self, state: GameState) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state;
        self.bump();
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut GameState) -> R) -> R {
        let result = f(&mut self.state.write().unwrap_or_else(|e| e.into_inner()));
        self.bump();
        result
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    // ---- Named mutators -------------------------------------------------

    /// Grant experience; level, max energy and max beings follow the
    /// progression tiers. Level and xp never decrease here.
    pub fn add_xp(&self, amount: i64) {
        if amount < 0 {
            warn!(amount, "Rejected negative xp grant");
            return;
        }
        self.mutate(|state| {
            let user = &mut state.user;
            user.xp = (user.xp + amount).min(COUNTER_CAP);
            let (level, _, max_beings, max_energy) = tier_for_xp(user.xp);
            if level > user.level {
                info!(level, "Level up");
                user.level = level;
            }
            user.max_energy = max_energy;
            user.max_beings = max_beings;
        });
    }

    pub fn add_consciousness(&self, amount: i64) {
        if amount < 0 {
            warn!(amount, "Rejected negative consciousness grant");
            return;
        }
        self.mutate(|state| {
            let user = &mut state.user;
            user.consciousness_points = (user.consciousness_points + amount).min(COUNTER_CAP);
        });
    }

    pub fn add_energy(&self, amount: i64) {
        if amount < 0 {
            warn!(amount, "Rejected negative energy grant");
            return;
        }
        self.mutate(|state| {
            let user = &mut state.user;
            user.energy = (user.energy + amount).min(user.max_energy);
        });
    }

    pub fn consume_energy(&self, amount: i64) {
        if amount < 0 {
            warn!(amount, "Rejected negative energy spend");
            return;
        }
        self.mutate(|state| {
            let user = &mut state.user;
            user.energy = (user.energy - amount).max(0);
        });
    }

    /// Unlock attribute fragments earned through reading.
    pub fn add_fragments(&self, attributes: &[&str]) {
        if attributes.is_empty() {
            return;
        }
        let obtained_at = chrono::Utc::now();
        self.mutate(|state| {
            for attribute in attributes {
                state.pieces.push(Piece {
                    attribute: attribute.to_string(),
                    obtained_at,
                });
            }
            state.user.stats.fractals_collected += attributes.len() as i64;
        });
    }

    /// Fold embedded-side reading time into lifetime statistics. The total
    /// only moves forward; a smaller reported value is ignored.
    pub fn update_statistics(&self, total_reading_time_secs: i64) {
        if total_reading_time_secs < 0 || total_reading_time_secs == i64::MAX {
            warn!(total_reading_time_secs, "Rejected invalid reading time");
            return;
        }
        self.mutate(|state| {
            let reading = &mut state.reading;
            if total_reading_time_secs > reading.total_reading_time_secs {
                reading.total_reading_time_secs = total_reading_time_secs;
                reading.last_session_at = Some(chrono::Utc::now());
            }
        });
    }

    /// Note an in-progress reading session. Session time stays with the
    /// mirrored per-chapter entry; totals arrive via [`Self::update_statistics`].
    pub fn update_reading_progress(&self) {
        self.mutate(|state| {
            state.reading.last_session_at = Some(chrono::Utc::now());
        });
    }

    /// Record one finished chapter and the xp it earned.
    pub fn record_chapter_read(&self, total_time_secs: i64, xp_earned: i64) {
        self.mutate(|state| {
            let reading = &mut state.reading;
            reading.chapters_read += 1;
            reading.time_spent_secs += total_time_secs.max(0);
            reading.xp_earned += xp_earned.max(0);
        });
    }

    pub fn streak(&self) -> Option<StreakState> {
        self.read(|s| s.reading.streak.clone())
    }

    pub fn set_streak(&self, streak: StreakState) {
        self.mutate(|state| state.reading.streak = Some(streak));
    }
}

impl Default for StateContainer {
    fn default() -> Self {
        Self::new(GameState::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_xp_levels_up_through_tiers() {
        let container = StateContainer::default();
        container.add_xp(120);

        container.read(|s| {
            assert_eq!(s.user.xp, 120);
            assert_eq!(s.user.level, 2);
            assert_eq!(s.user.max_energy, 120);
        });
    }

    #[test]
    fn test_invalid_amounts_leave_state_unchanged() {
        let container = StateContainer::default();
        container.add_xp(-10);
        container.add_energy(-1);
        container.add_consciousness(-3);

        container.read(|s| {
            assert_eq!(s.user.xp, 0);
            assert_eq!(s.user.energy, 100);
            assert_eq!(s.user.consciousness_points, 0);
        });
    }

    #[test]
    fn test_xp_caps_at_counter_limit() {
        let container = StateContainer::default();
        container.add_xp(COUNTER_CAP + 500);
        container.read(|s| assert_eq!(s.user.xp, COUNTER_CAP));
    }

    #[test]
    fn test_statistics_only_move_forward() {
        let container = StateContainer::default();
        container.update_statistics(600);
        container.update_statistics(300);
        container.read(|s| assert_eq!(s.reading.total_reading_time_secs, 600));
    }

    #[test]
    fn test_reading_progress_marks_session_activity() {
        let container = StateContainer::default();
        container.read(|s| assert!(s.reading.last_session_at.is_none()));
        container.update_reading_progress();
        container.read(|s| assert!(s.reading.last_session_at.is_some()));
    }

    #[test]
    fn test_revision_bumps_on_mutation() {
        let container = StateContainer::default();
        let rx = container.subscribe();
        let before = *rx.borrow();
        container.add_xp(10);
        assert!(*rx.borrow() > before);
    }

    #[test]
    fn test_fragments_accumulate() {
        let container = StateContainer::default();
        container.add_fragments(&["wisdom", "compassion"]);
        container.read(|s| {
            assert_eq!(s.pieces.len(), 2);
            assert_eq!(s.user.stats.fractals_collected, 2);
        });
    }
}
