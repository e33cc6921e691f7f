//! Matching engine configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lifetime of a connection request. Not configurable.
pub const REQUEST_TTL: Duration = Duration::from_secs(300);

/// Maximum length of a connection request message, in characters
pub const MAX_REQUEST_MESSAGE_CHARS: usize = 200;

/// Tunables for discovery, sweeps and the request protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Interval between high-quality match sweeps
    pub sweep_interval_seconds: u64,
    /// Profiles not updated within this window are evicted
    pub profile_retention_seconds: u64,
    /// Two rooms that matched within this window are not suggested again
    pub reconnect_cooldown_seconds: u64,
    /// Resolved requests are kept this long before garbage collection
    pub request_retention_seconds: u64,
    /// Top-candidate similarity that triggers a match-found notification
    pub high_quality_threshold: f64,
    /// Threshold used when a profile does not set its own
    pub default_similarity_threshold: f64,
    /// Maximum candidates returned by a search
    pub max_results: usize,
    /// Capacity of each profile's match history ring
    pub match_history_capacity: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            sweep_interval_seconds: 60,
            profile_retention_seconds: 3600,
            reconnect_cooldown_seconds: 3600,
            request_retention_seconds: 600,
            high_quality_threshold: 0.85,
            default_similarity_threshold: 0.7,
            max_results: 5,
            match_history_capacity: 20,
        }
    }
}

impl MatchingConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    pub fn profile_retention(&self) -> Duration {
        Duration::from_secs(self.profile_retention_seconds)
    }

    pub fn reconnect_cooldown(&self) -> Duration {
        Duration::from_secs(self.reconnect_cooldown_seconds)
    }

    pub fn request_retention(&self) -> Duration {
        Duration::from_secs(self.request_retention_seconds)
    }
}
