//! Shared session and battle configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ceiling on any session or battle duration a caller may ask for
pub const MAX_DURATION_SECONDS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Lifetime of a shared session unless the connect call overrides it
    pub session_duration_seconds: u64,
    /// Longest session lifetime a connect call may request
    pub max_session_duration_seconds: u64,
    /// Total battle length unless the start call overrides it
    pub battle_duration_seconds: u64,
    /// Longest battle a start call may request
    pub max_battle_duration_seconds: u64,
    /// Pause between battle-starting and battle-started
    pub battle_lead_in_seconds: u64,
    /// Tracks taken from each room when blending playlists
    pub top_tracks_per_room: usize,
    /// Tracks taken from each room for a battle rotation
    pub battle_tracks_per_room: usize,
    /// Upper bound on a blended playlist, filler included
    pub playlist_cap: usize,
    /// Finished battles stay readable this long
    pub battle_retention_seconds: u64,
    /// Ended sessions stay readable this long
    pub session_retention_seconds: u64,
    /// Interval of the retention cleanup task
    pub cleanup_interval_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_duration_seconds: 30 * 60,
            max_session_duration_seconds: 4 * 60 * 60,
            battle_duration_seconds: 90,
            max_battle_duration_seconds: 30 * 60,
            battle_lead_in_seconds: 3,
            top_tracks_per_room: 5,
            battle_tracks_per_room: 3,
            playlist_cap: 20,
            battle_retention_seconds: 300,
            session_retention_seconds: 300,
            cleanup_interval_seconds: 60,
        }
    }
}

impl SessionConfig {
    pub fn session_duration(&self) -> Duration {
        Duration::from_secs(self.session_duration_seconds)
    }

    pub fn battle_duration(&self) -> Duration {
        Duration::from_secs(self.battle_duration_seconds)
    }

    pub fn battle_lead_in(&self) -> Duration {
        Duration::from_secs(self.battle_lead_in_seconds)
    }

    pub fn battle_retention(&self) -> Duration {
        Duration::from_secs(self.battle_retention_seconds)
    }

    pub fn session_retention(&self) -> Duration {
        Duration::from_secs(self.session_retention_seconds)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }
}
