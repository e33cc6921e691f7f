//! Similarity and compatibility scoring between matching profiles

use crate::matching::profile::{MatchingProfile, GLOBAL};
use crate::mood::MoodVector;

/// Weight of mood similarity in the ranking score
pub const SIMILARITY_WEIGHT: f64 = 0.7;
/// Weight of compatibility in the ranking score
pub const COMPATIBILITY_WEIGHT: f64 = 0.3;

const SIZE_WEIGHT: f64 = 0.3;
const TAG_WEIGHT: f64 = 0.3;
const REGION_WEIGHT: f64 = 0.2;
const LANGUAGE_WEIGHT: f64 = 0.2;

/// Cosine similarity of two raw mood vectors.
///
/// Zero-magnitude vectors have no direction, so their similarity is 0.
pub fn cosine_similarity(a: &MoodVector, b: &MoodVector) -> f64 {
    let magnitude = a.magnitude() * b.magnitude();
    if magnitude == 0.0 {
        return 0.0;
    }
    (a.dot(b) / magnitude).clamp(-1.0, 1.0)
}

/// 1 when both rooms are the same size, falling towards 0 as they diverge
pub fn size_closeness(a: usize, b: usize) -> f64 {
    let largest = a.max(b);
    if largest == 0 {
        return 1.0;
    }
    1.0 - (a.abs_diff(b) as f64 / largest as f64)
}

/// Jaccard overlap of the two tag sets
pub fn tag_overlap(a: &MatchingProfile, b: &MatchingProfile) -> f64 {
    let union = a.tags.union(&b.tags).count();
    if union == 0 {
        return 0.0;
    }
    a.tags.intersection(&b.tags).count() as f64 / union as f64
}

pub fn region_match(a: &str, b: &str) -> f64 {
    if a == b || a == GLOBAL || b == GLOBAL {
        1.0
    } else {
        0.0
    }
}

pub fn language_match(a: &str, b: &str) -> f64 {
    if a == b {
        1.0
    } else if a == GLOBAL || b == GLOBAL {
        0.5
    } else {
        0.0
    }
}

/// Two rooms with different, non-global languages are never matched
pub fn languages_compatible(a: &str, b: &str) -> bool {
    language_match(a, b) > 0.0
}

/// Weighted blend of size, tag, region and language affinity, in [0, 1]
pub fn compatibility_score(a: &MatchingProfile, b: &MatchingProfile) -> f64 {
    SIZE_WEIGHT * size_closeness(a.participant_count, b.participant_count)
        + TAG_WEIGHT * tag_overlap(a, b)
        + REGION_WEIGHT * region_match(&a.region, &b.region)
        + LANGUAGE_WEIGHT * language_match(&a.language, &b.language)
}

/// Final ranking score for a candidate
pub fn ranking_score(similarity: f64, compatibility: f64) -> f64 {
    SIMILARITY_WEIGHT * similarity + COMPATIBILITY_WEIGHT * compatibility
}
