//! Session manager: shared sessions between two rooms and their battles
//!
//! A shared session merges two rooms' participants, mood and playlist for a
//! bounded lifetime. Within a connected session the rooms can run a timed
//! battle that rotates their top tracks and tallies engagement.

pub mod battle;
pub mod manager;
pub mod playlist;
pub mod scoring;
pub mod shared;

pub use battle::{Battle, BattleResult, BattleSlot, BattleStats, BattleStatus, MoodSample};
pub use manager::{SessionCollaborators, SessionManager, SessionManagerStats};
pub use scoring::{DirectoryEngagement, EngagementSource, FixedEngagement};
pub use shared::{
    BattleOptions, ConnectOptions, SessionConnector, SessionStatus, SharedSession,
};

#[cfg(test)]
pub use shared::MockSessionConnector;
