//! Key scope registry
//!
//! Every key that crosses the host/embedded boundary is classified here.
//! Unregistered keys are never mirrored in either direction.

use std::collections::HashMap;

/// Direction-of-authority for a synchronizable key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyScope {
    /// Flows both ways between host and embedded content.
    Shared,

    /// Persisted by the host for backup/continuity, never interpreted
    /// for reward logic unless a handler opts in.
    EmbeddedOnly,

    /// Never crosses the boundary.
    HostOnly,
}

/// Immutable classification of base keys, with prefix matching for keys the
/// embedded content suffixes with entity ids (`reading_progress_<book>_<ch>`).
pub struct SyncKeyRegistry {
    scopes: HashMap<&'static str, KeyScope>,
}

impl SyncKeyRegistry {
    pub fn new(entries: &[(&'static str, KeyScope)]) -> Self {
        Self {
            scopes: entries.iter().copied().collect(),
        }
    }

    /// Resolve the scope of a key. `None` means "ignore".
    ///
    /// A key matches a registered base name exactly, or as `<base>_<suffix>`.
    pub fn scope_of(&self, key: &str) -> Option<KeyScope> {
        if let Some(scope) = self.scopes.get(key) {
            return Some(*scope);
        }
        // Longest-prefix match so `reading_progress_x` does not resolve
        // through a shorter unrelated base.
        let mut rest = key;
        while let Some(idx) = rest.rfind('_') {
            rest = &rest[..idx];
            if let Some(scope) = self.scopes.get(rest) {
                return Some(*scope);
            }
        }
        None
    }

    pub fn is_shared(&self, key: &str) -> bool {
        matches!(self.scope_of(key), Some(KeyScope::Shared))
    }

    /// Keys the host mirrors into durable storage when received.
    pub fn is_mirrored(&self, key: &str) -> bool {
        matches!(
            self.scope_of(key),
            Some(KeyScope::Shared | KeyScope::EmbeddedOnly)
        )
    }
}

impl Default for SyncKeyRegistry {
    fn default() -> Self {
        use KeyScope::*;
        Self::new(&[
            // Shared auth/session projection
            ("auth_user", Shared),
            ("auth_session", Shared),
            ("premium_status", Shared),
            // Reading progress
            ("reading_progress", Shared),
            ("completed_chapters", Shared),
            ("bookmarks", Shared),
            ("reading_time", Shared),
            ("current_book", Shared),
            ("quiz_results", Shared),
            // Notes and highlights
            ("chapter_notes", Shared),
            ("notes", Shared),
            ("highlights", Shared),
            // Preferences
            ("user_preferences", Shared),
            ("app_settings", Shared),
            ("theme_preference", Shared),
            ("audio_settings", Shared),
            // Embedded content internals, backed up but not interpreted
            ("frankenstein_being", EmbeddedOnly),
            ("frankenstein_progress", EmbeddedOnly),
            // Host game state never leaves the host
            ("game_state", HostOnly),
            ("beings", HostOnly),
            ("missions", HostOnly),
        ])
    }
}
