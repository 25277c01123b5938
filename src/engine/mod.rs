//! Chat room engine: rooms, membership, admission, moderation, registry

pub mod admission;
pub mod moderation;
pub mod registry;
pub mod room;

pub use moderation::{ModerationAction, ModerationOutcome};
pub use registry::{MemoryRoomStore, RoomRegistry, RoomStore};
pub use room::{JoinOutcome, LeaveOutcome, Room};

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

/// Engine tuning knobs shared by every room
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum retained history entries per room
    pub history_cap: usize,
    /// Number of recent messages replayed on join
    pub replay_limit: usize,
    /// Grace window before an empty non-stream room is destroyed
    pub eviction_grace: Duration,
    /// Default timeout duration when a moderator gives none
    pub default_timeout_secs: u64,
    /// Maximum accepted message body length in characters
    pub max_message_len: usize,
    /// Platform-wide banned words, merged with each room's filter list
    pub banned_words: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_cap: 1000,
            replay_limit: 50,
            eviction_grace: Duration::from_secs(600),
            default_timeout_secs: 300,
            max_message_len: 1000,
            banned_words: Vec::new(),
        }
    }
}

/// Fixed palette for assigned display colors
pub const COLOR_PALETTE: [&str; 16] = [
    "#e91e63", "#9c27b0", "#673ab7", "#3f51b5", "#2196f3", "#03a9f4", "#00bcd4", "#009688",
    "#4caf50", "#8bc34a", "#cddc39", "#ffc107", "#ff9800", "#ff5722", "#795548", "#607d8b",
];

/// Pick a display color for a user
///
/// Hash-based so the same user id always lands on the same palette entry.
pub fn assign_color(user_id: &str) -> String {
    let mut hasher = DefaultHasher::new();
    user_id.hash(&mut hasher);
    let idx = (hasher.finish() % COLOR_PALETTE.len() as u64) as usize;
    COLOR_PALETTE[idx].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_color_deterministic() {
        let a = assign_color("user-1");
        let b = assign_color("user-1");
        assert_eq!(a, b);
        assert!(COLOR_PALETTE.contains(&a.as_str()));
    }

    #[test]
    fn test_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.history_cap, 1000);
        assert_eq!(config.replay_limit, 50);
        assert_eq!(config.eviction_grace, Duration::from_secs(600));
        assert_eq!(config.default_timeout_secs, 300);
    }
}
