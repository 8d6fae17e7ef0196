//! Reward reconciliation
//!
//! Pure diff/compute logic: both entry points are functions of their inputs,
//! side effects (applying xp, persisting the streak) belong to the caller.
//! The batch path owes its idempotence to ordering in the bridge — the
//! previously mirrored snapshot is read before the new one is written.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::config::RewardConfig;

/// Per-book, per-chapter completion map received from the embedded content.
pub type ProgressSnapshot = BTreeMap<String, BTreeMap<String, ChapterProgress>>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChapterProgress {
    pub completed: bool,
    pub progress: f64,
    pub time_spent: i64,
}

/// Always non-negative; derived deterministically from newly completed work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewardDelta {
    pub xp: i64,
    pub fragments: i64,
}

/// Durable consecutive-days-active counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreakState {
    pub current: i64,
    pub longest: i64,
    pub last_active_day: NaiveDate,
}

/// Advance the streak for activity on `today`.
///
/// Same day: unchanged. Exactly yesterday: increment. Anything earlier
/// (or no prior state): reset to 1.
pub fn advance_streak(prev: Option<&StreakState>, today: NaiveDate) -> StreakState {
    match prev {
        Some(s) if s.last_active_day == today => s.clone(),
        Some(s) if s.last_active_day.succ_opt() == Some(today) => StreakState {
            current: s.current + 1,
            longest: s.longest.max(s.current + 1),
            last_active_day: today,
        },
        Some(s) => StreakState {
            current: 1,
            longest: s.longest.max(1),
            last_active_day: today,
        },
        None => StreakState {
            current: 1,
            longest: 1,
            last_active_day: today,
        },
    }
}

/// Single-event reward for one completed chapter:
/// base + engagement-time bonus (capped) + streak bonus.
pub fn chapter_reward(cfg: &RewardConfig, total_time_secs: i64, streak_days: i64) -> i64 {
    let time_bonus = (total_time_secs.max(0) / 60).min(cfg.time_bonus_cap_xp);
    cfg.chapter_base_xp + time_bonus + streak_days.max(0) * cfg.streak_unit_xp
}

/// Bonus for a perfect quiz score; anything less grants nothing.
pub fn quiz_reward(cfg: &RewardConfig, score: i64, total_questions: i64) -> i64 {
    if total_questions > 0 && score >= total_questions {
        cfg.quiz_perfect_bonus_xp
    } else {
        0
    }
}

/// Outcome of a batch reconciliation: which chapters are newly completed,
/// and the summed reward they earn.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub newly_completed: BTreeMap<String, Vec<String>>,
    pub delta: RewardDelta,
}

/// Compare two progress snapshots and reward exactly the chapters completed
/// in `new` but not in `old`. A chapter already completed previously never
/// re-grants, no matter how often it is resubmitted.
pub fn diff_progress(cfg: &RewardConfig, old: &ProgressSnapshot, new: &ProgressSnapshot) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();

    for (book_id, chapters) in new {
        let previous = old.get(book_id);
        let newly: Vec<String> = chapters
            .iter()
            .filter(|(chapter_id, p)| {
                p.completed
                    && !previous
                        .and_then(|prev| prev.get(*chapter_id))
                        .map(|prev| prev.completed)
                        .unwrap_or(false)
            })
            .map(|(chapter_id, _)| chapter_id.clone())
            .collect();

        if !newly.is_empty() {
            let count = newly.len() as i64;
            outcome.delta.xp += count * cfg.chapter_base_xp;
            outcome.delta.fragments += count * cfg.fragments_per_chapter;
            outcome.newly_completed.insert(book_id.clone(), newly);
        }
    }

    outcome
}

/// Parse a mirrored progress value leniently: entries that do not look like
/// chapter progress are ignored rather than failing the whole snapshot.
pub fn parse_progress(value: &Value) -> ProgressSnapshot {
    let mut snapshot = ProgressSnapshot::new();
    let Some(books) = value.as_object() else {
        return snapshot;
    };
    for (book_id, chapters) in books {
        let Some(chapters) = chapters.as_object() else {
            continue;
        };
        let parsed: BTreeMap<String, ChapterProgress> = chapters
            .iter()
            .filter_map(|(chapter_id, raw)| {
                serde_json::from_value(raw.clone())
                    .ok()
                    .map(|p| (chapter_id.clone(), p))
            })
            .collect();
        snapshot.insert(book_id.clone(), parsed);
    }
    snapshot
}

/// Attributes for the fragments one completed chapter grants: the book's
/// theme list cycled to the configured count, so the number of pieces
/// always matches `RewardConfig.fragments_per_chapter`.
pub fn fragment_attributes(book_id: &str, count: i64) -> Vec<&'static str> {
    book_fragments(book_id)
        .iter()
        .copied()
        .cycle()
        .take(count.max(0) as usize)
        .collect()
}

/// Attribute themes per book. Unknown books fall back to awareness.
fn book_fragments(book_id: &str) -> &'static [&'static str] {
    match book_id {
        "manual-practico" => &["compassion", "wisdom"],
        "toolkit-transicion" => &["creativity", "resilience"],
        "guia-acciones" => &["courage", "determination"],
        "practicas-radicales" => &["mindfulness", "presence"],
        "filosofia-nuevo-ser" => &["wisdom", "understanding"],
        "tierra-que-despierta" => &["connection", "awareness"],
        "dialogos-maquina" => &["curiosity", "integration"],
        "frankenstein-nuevo-ser" => &["creation", "responsibility"],
        "ahora-instituciones" => &["organization", "collaboration"],
        _ => &["awareness"],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> RewardConfig {
        RewardConfig::default()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_streak_same_day_unchanged() {
        let today = day(2026, 3, 10);
        let prev = StreakState {
            current: 4,
            longest: 6,
            last_active_day: today,
        };
        let next = advance_streak(Some(&prev), today);
        assert_eq!(next.current, 4);
        assert_eq!(next.longest, 6);
    }

    #[test]
    fn test_streak_yesterday_increments() {
        let prev = StreakState {
            current: 4,
            longest: 4,
            last_active_day: day(2026, 3, 9),
        };
        let next = advance_streak(Some(&prev), day(2026, 3, 10));
        assert_eq!(next.current, 5);
        assert_eq!(next.longest, 5);
    }

    #[test]
    fn test_streak_gap_resets_to_one() {
        let prev = StreakState {
            current: 9,
            longest: 9,
            last_active_day: day(2026, 3, 1),
        };
        let next = advance_streak(Some(&prev), day(2026, 3, 10));
        assert_eq!(next.current, 1);
        assert_eq!(next.longest, 9);
    }

    #[test]
    fn test_streak_across_month_boundary() {
        let prev = StreakState {
            current: 2,
            longest: 2,
            last_active_day: day(2026, 2, 28),
        };
        let next = advance_streak(Some(&prev), day(2026, 3, 1));
        assert_eq!(next.current, 3);
    }

    #[test]
    fn test_chapter_reward_formula_and_cap() {
        // 10 minutes of engagement, 3-day streak
        assert_eq!(chapter_reward(&cfg(), 600, 3), 50 + 10 + 15);
        // time bonus capped at 30
        assert_eq!(chapter_reward(&cfg(), 100_000, 0), 50 + 30);
        // negative inputs never subtract
        assert_eq!(chapter_reward(&cfg(), -5, -2), 50);
    }

    #[test]
    fn test_quiz_reward_only_for_perfect_score() {
        assert_eq!(quiz_reward(&cfg(), 10, 10), 20);
        assert_eq!(quiz_reward(&cfg(), 9, 10), 0);
        assert_eq!(quiz_reward(&cfg(), 0, 0), 0);
    }

    fn snapshot(entries: &[(&str, &[(&str, bool)])]) -> ProgressSnapshot {
        entries
            .iter()
            .map(|(book, chapters)| {
                (
                    book.to_string(),
                    chapters
                        .iter()
                        .map(|(ch, done)| {
                            (
                                ch.to_string(),
                                ChapterProgress {
                                    completed: *done,
                                    ..Default::default()
                                },
                            )
                        })
                        .collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_diff_rewards_only_newly_completed() {
        let old = snapshot(&[("bookA", &[("ch1", true), ("ch2", false)])]);
        let new = snapshot(&[("bookA", &[("ch1", true), ("ch2", true)])]);

        let outcome = diff_progress(&cfg(), &old, &new);
        assert_eq!(outcome.delta.xp, 50);
        assert_eq!(outcome.delta.fragments, 2);
        assert_eq!(outcome.newly_completed["bookA"], vec!["ch2".to_string()]);

        // Identical resubmission grants nothing.
        let again = diff_progress(&cfg(), &new, &new);
        assert_eq!(again.delta, RewardDelta::default());
        assert!(again.newly_completed.is_empty());
    }

    #[test]
    fn test_diff_with_no_previous_book_counts_everything() {
        let old = ProgressSnapshot::new();
        let new = snapshot(&[("bookB", &[("ch1", true), ("ch2", true), ("ch3", false)])]);

        let outcome = diff_progress(&cfg(), &old, &new);
        assert_eq!(outcome.delta.xp, 100);
        assert_eq!(outcome.delta.fragments, 4);
    }

    #[test]
    fn test_fragment_attributes_cycle_to_configured_count() {
        assert_eq!(
            fragment_attributes("manual-practico", 3),
            vec!["compassion", "wisdom", "compassion"]
        );
        // Unknown books repeat the awareness fallback.
        assert_eq!(fragment_attributes("mystery-book", 2), vec!["awareness", "awareness"]);
        assert!(fragment_attributes("manual-practico", 0).is_empty());
        assert!(fragment_attributes("manual-practico", -1).is_empty());
    }

    #[test]
    fn test_parse_progress_ignores_malformed_entries() {
        let raw = serde_json::json!({
            "bookA": {
                "ch1": { "completed": true },
                "ch2": "not an object"
            },
            "bookB": 17
        });

        let parsed = parse_progress(&raw);
        assert!(parsed["bookA"]["ch1"].completed);
        assert!(!parsed["bookA"].contains_key("ch2"));
        assert!(!parsed.contains_key("bookB"));
    }
}
