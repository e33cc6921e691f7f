//! Confidence-weighted fusion of mood observations
//!
//! `fuse` is a pure function: the same observation list (in the same order)
//! always yields a bit-identical [`FusedMood`].

use crate::mood::vector::{nearest_mood, vector_of, MoodVector, NEUTRAL_MOOD};
use crate::types::Participant;
use serde::{Deserialize, Serialize};

/// Upper bound on the confidence of a multi-source fusion
pub const MAX_FUSED_CONFIDENCE: f64 = 0.95;

/// Lower bound on the consistency factor
pub const MIN_CONSISTENCY: f64 = 0.1;

/// A single mood reading fed into fusion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodObservation {
    /// Mood name, synonym or emoji
    pub mood: String,
    /// Reporter confidence in [0, 1]
    pub confidence: f64,
    /// Relative importance, >= 0
    pub weight: f64,
}

impl MoodObservation {
    pub fn new(mood: impl Into<String>, confidence: f64, weight: f64) -> Self {
        Self {
            mood: mood.into(),
            confidence,
            weight,
        }
    }
}

impl From<&Participant> for MoodObservation {
    fn from(participant: &Participant) -> Self {
        Self::new(participant.mood.clone(), participant.confidence, 1.0)
    }
}

/// How a fused mood was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionSource {
    Single,
    Fusion,
    Default,
}

/// One observation's share of the fused result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionContributor {
    pub label: String,
    pub confidence: f64,
    pub effective_weight: f64,
}

/// Result of fusing a set of mood observations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedMood {
    pub vector: MoodVector,
    pub label: String,
    pub confidence: f64,
    pub source: FusionSource,
    pub contributors: Vec<FusionContributor>,
}

impl FusedMood {
    /// The neutral fused mood returned for empty input
    pub fn neutral() -> Self {
        Self {
            vector: MoodVector::neutral(),
            label: NEUTRAL_MOOD.to_string(),
            confidence: 1.0,
            source: FusionSource::Default,
            contributors: Vec::new(),
        }
    }
}

impl Default for FusedMood {
    fn default() -> Self {
        Self::neutral()
    }
}

fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

fn sanitize_weight(weight: f64) -> f64 {
    if weight.is_nan() || weight < 0.0 {
        0.0
    } else {
        weight
    }
}

/// Fuse mood observations into a single labelled point.
///
/// - empty input: neutral, confidence 1.0, source `Default`
/// - one observation: its own vector and confidence, source `Single`
/// - otherwise: weighted centroid, confidence discounted by consistency
///
/// When every observation carries zero effective weight the centroid falls
/// back to equal weights.
pub fn fuse(observations: &[MoodObservation]) -> FusedMood {
    if observations.is_empty() {
        return FusedMood::neutral();
    }

    let points: Vec<(MoodVector, f64, f64)> = observations
        .iter()
        .map(|obs| {
            let confidence = clamp_confidence(obs.confidence);
            let effective_weight = confidence * sanitize_weight(obs.weight);
            (vector_of(&obs.mood), confidence, effective_weight)
        })
        .collect();

    let contributors: Vec<FusionContributor> = points
        .iter()
        .map(|(vector, confidence, effective_weight)| FusionContributor {
            label: nearest_mood(vector).to_string(),
            confidence: *confidence,
            effective_weight: *effective_weight,
        })
        .collect();

    if let [(vector, confidence, _)] = points.as_slice() {
        return FusedMood {
            vector: *vector,
            label: nearest_mood(vector).to_string(),
            confidence: *confidence,
            source: FusionSource::Single,
            contributors,
        };
    }

    let total_weight: f64 = points.iter().map(|(_, _, w)| w).sum();
    let (sum_valence, sum_arousal, normalizer) = if total_weight > 0.0 {
        let (v, a) = points.iter().fold((0.0, 0.0), |(v, a), (point, _, w)| {
            (v + point.valence * w, a + point.arousal * w)
        });
        (v, a, total_weight)
    } else {
        let (v, a) = points
            .iter()
            .fold((0.0, 0.0), |(v, a), (point, _, _)| (v + point.valence, a + point.arousal));
        (v, a, points.len() as f64)
    };

    let centroid = MoodVector::new(sum_valence / normalizer, sum_arousal / normalizer);

    let count = points.len() as f64;
    let mean_distance = points
        .iter()
        .map(|(point, _, _)| point.distance(&centroid))
        .sum::<f64>()
        / count;
    let consistency = (1.0 - mean_distance / 2.0).max(MIN_CONSISTENCY);
    let mean_confidence = points.iter().map(|(_, c, _)| c).sum::<f64>() / count;
    let confidence = (mean_confidence * consistency).min(MAX_FUSED_CONFIDENCE);

    FusedMood {
        vector: centroid,
        label: nearest_mood(&centroid).to_string(),
        confidence,
        source: FusionSource::Fusion,
        contributors,
    }
}

/// Fuse the current moods of a set of participants, one vote each
pub fn fuse_participants<'a, I>(participants: I) -> FusedMood
where
    I: IntoIterator<Item = &'a Participant>,
{
    let observations: Vec<MoodObservation> =
        participants.into_iter().map(MoodObservation::from).collect();
    fuse(&observations)
}
