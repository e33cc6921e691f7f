//! Valence-arousal mood space and the canonical mood table
//!
//! Every named mood maps to a fixed point in the 2-D valence/arousal plane.
//! Synonyms and emoji are normalized to a canonical key first; unknown input
//! falls back to `neutral` so callers always get a usable point.

use serde::{Deserialize, Serialize};

/// Canonical key used for unknown or missing moods
pub const NEUTRAL_MOOD: &str = "neutral";

/// A point in valence/arousal space, both components within [-1, 1]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MoodVector {
    pub valence: f64,
    pub arousal: f64,
}

impl MoodVector {
    /// Create a vector, clamping both components into range
    pub fn new(valence: f64, arousal: f64) -> Self {
        Self {
            valence: clamp_unit(valence),
            arousal: clamp_unit(arousal),
        }
    }

    /// The neutral origin
    pub const fn neutral() -> Self {
        Self {
            valence: 0.0,
            arousal: 0.0,
        }
    }

    pub fn magnitude(&self) -> f64 {
        (self.valence * self.valence + self.arousal * self.arousal).sqrt()
    }

    /// Euclidean distance to another point
    pub fn distance(&self, other: &MoodVector) -> f64 {
        let dv = self.valence - other.valence;
        let da = self.arousal - other.arousal;
        (dv * dv + da * da).sqrt()
    }

    pub fn dot(&self, other: &MoodVector) -> f64 {
        self.valence * other.valence + self.arousal * other.arousal
    }

    /// Re-apply the range invariant
    pub fn clamped(self) -> Self {
        Self::new(self.valence, self.arousal)
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(-1.0, 1.0)
    }
}

/// Canonical moods in lookup order. Order also breaks nearest-label ties.
pub const CANONICAL_MOODS: &[(&str, MoodVector)] = &[
    (NEUTRAL_MOOD, MoodVector::neutral()),
    ("happy", MoodVector { valence: 0.8, arousal: 0.5 }),
    ("excited", MoodVector { valence: 0.7, arousal: 0.8 }),
    ("energetic", MoodVector { valence: 0.5, arousal: 0.9 }),
    ("content", MoodVector { valence: 0.6, arousal: 0.1 }),
    ("romantic", MoodVector { valence: 0.6, arousal: 0.3 }),
    ("relaxed", MoodVector { valence: 0.7, arousal: -0.3 }),
    ("calm", MoodVector { valence: 0.5, arousal: -0.6 }),
    ("peaceful", MoodVector { valence: 0.4, arousal: -0.8 }),
    ("dreamy", MoodVector { valence: 0.3, arousal: -0.4 }),
    ("focused", MoodVector { valence: 0.2, arousal: 0.3 }),
    ("nostalgic", MoodVector { valence: 0.1, arousal: -0.3 }),
    ("tired", MoodVector { valence: -0.1, arousal: -0.9 }),
    ("bored", MoodVector { valence: -0.3, arousal: -0.7 }),
    ("melancholy", MoodVector { valence: -0.4, arousal: -0.4 }),
    ("sad", MoodVector { valence: -0.7, arousal: -0.4 }),
    ("frustrated", MoodVector { valence: -0.6, arousal: 0.4 }),
    ("anxious", MoodVector { valence: -0.5, arousal: 0.7 }),
    ("angry", MoodVector { valence: -0.7, arousal: 0.8 }),
];

/// Synonyms and emoji, resolved to canonical keys
const ALIASES: &[(&str, &str)] = &[
    ("joyful", "happy"),
    ("cheerful", "happy"),
    ("glad", "happy"),
    ("😊", "happy"),
    ("😄", "happy"),
    ("🙂", "happy"),
    ("hyped", "excited"),
    ("thrilled", "excited"),
    ("🤩", "excited"),
    ("🎉", "excited"),
    ("pumped", "energetic"),
    ("hype", "energetic"),
    ("⚡", "energetic"),
    ("🔥", "energetic"),
    ("satisfied", "content"),
    ("good", "content"),
    ("love", "romantic"),
    ("🥰", "romantic"),
    ("😍", "romantic"),
    ("chill", "relaxed"),
    ("laid-back", "relaxed"),
    ("😎", "relaxed"),
    ("mellow", "calm"),
    ("😌", "calm"),
    ("serene", "peaceful"),
    ("🧘", "peaceful"),
    ("💭", "dreamy"),
    ("thoughtful", "focused"),
    ("🤔", "focused"),
    ("🎧", "focused"),
    ("sleepy", "tired"),
    ("exhausted", "tired"),
    ("😴", "tired"),
    ("😐", "neutral"),
    ("meh", "bored"),
    ("🥱", "bored"),
    ("wistful", "melancholy"),
    ("down", "sad"),
    ("blue", "sad"),
    ("unhappy", "sad"),
    ("😢", "sad"),
    ("😭", "sad"),
    ("annoyed", "frustrated"),
    ("😤", "frustrated"),
    ("nervous", "anxious"),
    ("worried", "anxious"),
    ("stressed", "anxious"),
    ("😰", "anxious"),
    ("mad", "angry"),
    ("furious", "angry"),
    ("😡", "angry"),
    ("😠", "angry"),
];

/// Normalize a mood name, synonym or emoji to its canonical key
pub fn normalize_mood(input: &str) -> &'static str {
    let key = input.trim().to_lowercase();

    if let Some((name, _)) = CANONICAL_MOODS.iter().find(|(name, _)| *name == key) {
        return *name;
    }

    ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, canonical)| *canonical)
        .unwrap_or(NEUTRAL_MOOD)
}

/// Map a mood name or emoji to its point in mood space
pub fn vector_of(mood: &str) -> MoodVector {
    let canonical = normalize_mood(mood);
    CANONICAL_MOODS
        .iter()
        .find(|(name, _)| *name == canonical)
        .map(|(_, vector)| *vector)
        .unwrap_or_else(MoodVector::neutral)
}

/// Nearest canonical mood label by Euclidean distance
pub fn nearest_mood(point: &MoodVector) -> &'static str {
    let mut best = (NEUTRAL_MOOD, f64::INFINITY);
    for (name, vector) in CANONICAL_MOODS {
        let distance = point.distance(vector);
        if distance < best.1 {
            best = (*name, distance);
        }
    }
    best.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_lookup() {
        assert_eq!(vector_of("happy"), MoodVector::new(0.8, 0.5));
        assert_eq!(vector_of("  Calm "), MoodVector::new(0.5, -0.6));
    }

    #[test]
    fn test_synonyms_and_emoji() {
        assert_eq!(normalize_mood("chill"), "relaxed");
        assert_eq!(normalize_mood("😡"), "angry");
        assert_eq!(vector_of("🎉"), vector_of("excited"));
    }

    #[test]
    fn test_unknown_maps_to_neutral() {
        assert_eq!(normalize_mood("flibbertigibbet"), NEUTRAL_MOOD);
        assert_eq!(vector_of(""), MoodVector::neutral());
    }

    #[test]
    fn test_nearest_mood_round_trips_canonical_points() {
        for (name, vector) in CANONICAL_MOODS {
            assert_eq!(nearest_mood(vector), *name);
        }
    }

    #[test]
    fn test_clamping() {
        let v = MoodVector::new(3.0, -7.5);
        assert_eq!(v.valence, 1.0);
        assert_eq!(v.arousal, -1.0);

        let nan = MoodVector::new(f64::NAN, 0.5);
        assert_eq!(nan.valence, 0.0);
    }

    #[test]
    fn test_distance() {
        let a = MoodVector::new(0.0, 0.0);
        let b = MoodVector::new(0.3, 0.4);
        assert!((a.distance(&b) - 0.5).abs() < 1e-12);
    }
}
