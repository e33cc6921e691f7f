//! Matching profiles and the anonymous directory that owns them

use crate::error::{BridgeError, Result};
use crate::mood::{FusedMood, MoodVector};
use crate::types::RoomId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};

/// Region or language value that matches everything
pub const GLOBAL: &str = "global";

/// Participant-count range a room is willing to connect with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeBounds {
    pub min: usize,
    pub max: usize,
}

impl SizeBounds {
    pub fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, participant_count: usize) -> bool {
        participant_count >= self.min && participant_count <= self.max
    }
}

impl Default for SizeBounds {
    fn default() -> Self {
        Self { min: 1, max: 100 }
    }
}

/// Discovery preferences supplied when a room opts in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingOptions {
    /// Private rooms can search and be requested by anonymous id, but never
    /// show up in other rooms' results
    pub is_public: bool,
    pub allow_matching: bool,
    /// Falls back to the engine default when unset
    pub similarity_threshold: Option<f64>,
    pub size_bounds: SizeBounds,
    pub tags: Vec<String>,
    pub region: String,
    pub language: String,
}

impl Default for MatchingOptions {
    fn default() -> Self {
        Self {
            is_public: true,
            allow_matching: true,
            similarity_threshold: None,
            size_bounds: SizeBounds::default(),
            tags: Vec::new(),
            region: GLOBAL.to_string(),
            language: GLOBAL.to_string(),
        }
    }
}

impl MatchingOptions {
    pub fn validate(&self) -> Result<()> {
        if let Some(threshold) = self.similarity_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(BridgeError::validation(format!(
                    "Similarity threshold must be within [0, 1], got {}",
                    threshold
                ))
                .into());
            }
        }

        if self.size_bounds.min > self.size_bounds.max {
            return Err(BridgeError::validation(format!(
                "Size bounds are inverted: min {} > max {}",
                self.size_bounds.min, self.size_bounds.max
            ))
            .into());
        }

        if self.size_bounds.max == 0 {
            return Err(BridgeError::validation("Size bounds max must be greater than 0").into());
        }

        Ok(())
    }
}

/// What happened between two rooms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchAction {
    RequestSent,
    RequestReceived,
    Connected,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchHistoryEntry {
    pub room_id: RoomId,
    pub action: MatchAction,
    pub timestamp: DateTime<Utc>,
}

/// One room's entry in the discovery directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingProfile {
    pub room_id: RoomId,
    pub anonymous_id: String,
    pub mood_vector: MoodVector,
    pub mood_label: String,
    pub mood_confidence: f64,
    pub participant_count: usize,
    pub is_public: bool,
    pub allow_matching: bool,
    pub similarity_threshold: f64,
    pub size_bounds: SizeBounds,
    pub tags: BTreeSet<String>,
    pub region: String,
    pub language: String,
    pub last_updated: DateTime<Utc>,
    pub last_search: Option<DateTime<Utc>>,
    pub match_history: VecDeque<MatchHistoryEntry>,
}

impl MatchingProfile {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        room_id: RoomId,
        anonymous_id: String,
        mood: &FusedMood,
        participant_count: usize,
        options: &MatchingOptions,
        default_threshold: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            room_id,
            anonymous_id,
            mood_vector: mood.vector,
            mood_label: mood.label.clone(),
            mood_confidence: mood.confidence,
            participant_count,
            is_public: options.is_public,
            allow_matching: options.allow_matching,
            similarity_threshold: options.similarity_threshold.unwrap_or(default_threshold),
            size_bounds: options.size_bounds,
            tags: options
                .tags
                .iter()
                .map(|tag| tag.trim().to_lowercase())
                .filter(|tag| !tag.is_empty())
                .collect(),
            region: normalize_locale(&options.region),
            language: normalize_locale(&options.language),
            last_updated: now,
            last_search: None,
            match_history: VecDeque::new(),
        }
    }

    /// Refresh the mood fields
    pub fn update_mood(&mut self, mood: &FusedMood, participant_count: usize, now: DateTime<Utc>) {
        self.mood_vector = mood.vector;
        self.mood_label = mood.label.clone();
        self.mood_confidence = mood.confidence;
        self.participant_count = participant_count;
        self.last_updated = now;
    }

    /// Append to the history ring, dropping the oldest entry when full
    pub fn record(&mut self, entry: MatchHistoryEntry, capacity: usize) {
        self.match_history.push_back(entry);
        while self.match_history.len() > capacity.max(1) {
            self.match_history.pop_front();
        }
    }

    /// Whether this room connected to `other` within the cooldown window
    pub fn connected_recently(
        &self,
        other: &str,
        now: DateTime<Utc>,
        cooldown: chrono::Duration,
    ) -> bool {
        self.match_history.iter().any(|entry| {
            entry.action == MatchAction::Connected
                && entry.room_id == other
                && now - entry.timestamp < cooldown
        })
    }
}

fn normalize_locale(value: &str) -> String {
    let value = value.trim().to_lowercase();
    if value.is_empty() {
        GLOBAL.to_string()
    } else {
        value
    }
}

/// Anonymous view of a profile, safe to hand to other rooms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub anonymous_id: String,
    pub mood_label: String,
    pub mood_vector: MoodVector,
    pub participant_count: usize,
    pub tags: Vec<String>,
    pub region: String,
    pub language: String,
    pub similarity: f64,
    pub compatibility: f64,
    pub score: f64,
}

/// Profiles and their anonymous-id index.
///
/// Both maps live under the same lock, so a profile and its anonymous id are
/// always inserted and evicted together.
#[derive(Debug, Default)]
pub struct ProfileDirectory {
    profiles: HashMap<RoomId, MatchingProfile>,
    anonymous_index: HashMap<String, RoomId>,
}

impl ProfileDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a profile, keeping the index in sync
    pub fn insert(&mut self, profile: MatchingProfile) -> Option<MatchingProfile> {
        let previous = self.profiles.remove(&profile.room_id);
        if let Some(previous) = &previous {
            self.anonymous_index.remove(&previous.anonymous_id);
        }
        self.anonymous_index
            .insert(profile.anonymous_id.clone(), profile.room_id.clone());
        self.profiles.insert(profile.room_id.clone(), profile);
        previous
    }

    /// Remove a profile together with its anonymous id
    pub fn remove(&mut self, room_id: &str) -> Option<MatchingProfile> {
        let profile = self.profiles.remove(room_id)?;
        self.anonymous_index.remove(&profile.anonymous_id);
        Some(profile)
    }

    pub fn get(&self, room_id: &str) -> Option<&MatchingProfile> {
        self.profiles.get(room_id)
    }

    pub fn get_mut(&mut self, room_id: &str) -> Option<&mut MatchingProfile> {
        self.profiles.get_mut(room_id)
    }

    /// Resolve an anonymous id to its live profile
    pub fn resolve(&self, anonymous_id: &str) -> Option<&MatchingProfile> {
        self.anonymous_index
            .get(anonymous_id)
            .and_then(|room_id| self.profiles.get(room_id))
    }

    pub fn profiles(&self) -> impl Iterator<Item = &MatchingProfile> {
        self.profiles.values()
    }

    /// Evict every profile not updated since `cutoff`
    pub fn evict_stale(&mut self, cutoff: DateTime<Utc>) -> Vec<RoomId> {
        let stale: Vec<RoomId> = self
            .profiles
            .values()
            .filter(|profile| profile.last_updated < cutoff)
            .map(|profile| profile.room_id.clone())
            .collect();

        for room_id in &stale {
            self.remove(room_id);
        }
        stale
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Number of anonymous ids still resolvable
    pub fn anonymous_len(&self) -> usize {
        self.anonymous_index.len()
    }
}
