//! Config loading and defaults integration tests

use biblioteca_sync::EngineConfig;

/// Verify that default EngineConfig is constructible and has sensible defaults.
#[test]
fn test_default_config_values() {
    let config = EngineConfig::default();

    assert_eq!(config.store.save_debounce_ms, 500);
    assert_eq!(config.store.snapshot_key, "game_state");
    assert_eq!(config.store.last_sync_key, "sync_last_sync");
    assert_eq!(config.scheduler.sync_interval_secs, 30);
    assert_eq!(config.rewards.chapter_base_xp, 50);
    assert_eq!(config.rewards.time_bonus_cap_xp, 30);
    assert_eq!(config.rewards.streak_unit_xp, 5);
    assert_eq!(config.rewards.fragments_per_chapter, 2);
    assert_eq!(config.rewards.quiz_perfect_bonus_xp, 20);
}

#[test]
fn test_config_with_all_fields() {
    let toml_str = r#"
[store]
save_debounce_ms = 250
snapshot_key = "game_state_v2"
last_sync_key = "sync_marks"

[scheduler]
sync_interval_secs = 10

[rewards]
chapter_base_xp = 100
time_bonus_cap_xp = 60
streak_unit_xp = 10
fragments_per_chapter = 3
quiz_perfect_bonus_xp = 40
"#;

    let config = EngineConfig::from_toml(toml_str).expect("valid TOML");

    assert_eq!(config.store.save_debounce_ms, 250);
    assert_eq!(config.store.snapshot_key, "game_state_v2");
    assert_eq!(config.store.last_sync_key, "sync_marks");
    assert_eq!(config.scheduler.sync_interval_secs, 10);
    assert_eq!(config.rewards.chapter_base_xp, 100);
    assert_eq!(config.rewards.time_bonus_cap_xp, 60);
    assert_eq!(config.rewards.streak_unit_xp, 10);
    assert_eq!(config.rewards.fragments_per_chapter, 3);
    assert_eq!(config.rewards.quiz_perfect_bonus_xp, 40);
}

#[test]
fn test_config_partial_overrides() {
    // Only override the debounce, keep everything else as default
    let toml_str = r#"
[store]
save_debounce_ms = 50
"#;

    let config = EngineConfig::from_toml(toml_str).expect("valid TOML");

    assert_eq!(config.store.save_debounce_ms, 50);
    assert_eq!(config.store.snapshot_key, "game_state");
    assert_eq!(config.scheduler.sync_interval_secs, 30);
    assert_eq!(config.rewards.chapter_base_xp, 50);
}

#[test]
fn test_empty_document_uses_defaults() {
    let config = EngineConfig::from_toml("").expect("empty TOML is valid");
    assert_eq!(config.store.save_debounce_ms, 500);
    assert_eq!(config.scheduler.sync_interval_secs, 30);
}

#[test]
fn test_invalid_toml_returns_error() {
    let bad_toml = "this is not valid { toml }}}";
    assert!(EngineConfig::from_toml(bad_toml).is_err());
}
