//! Mood-based room discovery and anonymous connection requests
//!
//! Rooms opt in with a matching profile, search for rooms with a similar
//! mood, and ask them to connect without revealing their identity. Accepted
//! requests become shared sessions through a [`crate::session::SessionConnector`].

pub mod engine;
pub mod profile;
pub mod request;
pub mod similarity;

// Re-export commonly used types
pub use engine::{MatchingEngine, MatchingStats};
pub use profile::{
    MatchAction, MatchCandidate, MatchHistoryEntry, MatchingOptions, MatchingProfile,
    ProfileDirectory, SizeBounds,
};
pub use request::{ConnectionRequest, RequestStatus, ResponseDecision};
pub use similarity::{compatibility_score, cosine_similarity, ranking_score};
