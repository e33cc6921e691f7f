//! Mood fusion for the session orchestration service
//!
//! Converts mood names and emoji into valence/arousal points, fuses sets of
//! observations into a confidence-weighted centroid and labels any point with
//! its nearest canonical mood.

pub mod fusion;
pub mod vector;

// Re-export commonly used types
pub use fusion::{
    fuse, fuse_participants, FusedMood, FusionContributor, FusionSource, MoodObservation,
};
pub use vector::{nearest_mood, normalize_mood, vector_of, MoodVector, NEUTRAL_MOOD};
