//! Pluggable engagement and mood sampling for battles

use crate::directory::RoomDirectory;
use crate::error::{BridgeError, Result};
use crate::mood::{fuse_participants, MoodVector};
use crate::types::{RoomId, Track};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Passive engagement contributed by each present participant, scaled by
/// how confident their latest mood tag was
pub const PASSIVE_ENGAGEMENT_PER_PARTICIPANT: f64 = 0.1;

/// Where battles get their passive engagement and mood samples from
#[async_trait]
pub trait EngagementSource: Send + Sync {
    /// Engagement earned by `room_id` while `track` played
    async fn passive_engagement(&self, room_id: &str, track: &Track) -> Result<f64>;

    /// Current mood of the two rooms taken together
    async fn sample_mood(&self, room_a: &str, room_b: &str) -> Result<MoodVector>;
}

/// Derives engagement and mood from live room snapshots
pub struct DirectoryEngagement {
    directory: Arc<dyn RoomDirectory>,
}

impl DirectoryEngagement {
    pub fn new(directory: Arc<dyn RoomDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl EngagementSource for DirectoryEngagement {
    async fn passive_engagement(&self, room_id: &str, _track: &Track) -> Result<f64> {
        let snapshot = self.directory.get_room_snapshot(room_id).await?;
        let presence: f64 = snapshot
            .participants
            .iter()
            .map(|participant| participant.confidence.clamp(0.0, 1.0))
            .sum();
        Ok(presence * PASSIVE_ENGAGEMENT_PER_PARTICIPANT)
    }

    async fn sample_mood(&self, room_a: &str, room_b: &str) -> Result<MoodVector> {
        let snapshot_a = self.directory.get_room_snapshot(room_a).await?;
        let snapshot_b = self.directory.get_room_snapshot(room_b).await?;
        let fused = fuse_participants(
            snapshot_a
                .participants
                .iter()
                .chain(snapshot_b.participants.iter()),
        );
        Ok(fused.vector)
    }
}

/// Scripted engagement for deterministic battles.
///
/// Passive engagement is a fixed value per room. Mood samples are served from
/// a queue, and the last queued sample repeats once the queue is drained.
#[derive(Debug, Default)]
pub struct FixedEngagement {
    passive: HashMap<RoomId, f64>,
    moods: Mutex<VecDeque<MoodVector>>,
}

impl FixedEngagement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_passive(mut self, room_id: impl Into<RoomId>, engagement: f64) -> Self {
        self.passive.insert(room_id.into(), engagement);
        self
    }

    pub fn with_mood_samples(self, samples: Vec<MoodVector>) -> Self {
        Self {
            moods: Mutex::new(samples.into()),
            ..self
        }
    }
}

#[async_trait]
impl EngagementSource for FixedEngagement {
    async fn passive_engagement(&self, room_id: &str, _track: &Track) -> Result<f64> {
        Ok(self.passive.get(room_id).copied().unwrap_or(0.0))
    }

    async fn sample_mood(&self, _room_a: &str, _room_b: &str) -> Result<MoodVector> {
        let mut moods = self
            .moods
            .lock()
            .map_err(|_| BridgeError::internal("Failed to acquire mood samples lock"))?;

        let sample = if moods.len() > 1 {
            moods.pop_front()
        } else {
            moods.front().copied()
        };
        Ok(sample.unwrap_or_else(MoodVector::neutral))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::InMemoryRoomDirectory;
    use crate::types::{Participant, RoomSnapshot};

    #[tokio::test]
    async fn test_directory_engagement_scales_with_presence() {
        let directory = Arc::new(InMemoryRoomDirectory::new());
        directory
            .upsert_room(
                "room-a",
                RoomSnapshot {
                    participants: vec![
                        Participant::new("u1", "happy", 1.0),
                        Participant::new("u2", "happy", 0.5),
                    ],
                    top_tracks: Vec::new(),
                },
            )
            .unwrap();

        let source = DirectoryEngagement::new(directory);
        let track = Track::new("t1", "Song", "Artist");
        let engagement = source.passive_engagement("room-a", &track).await.unwrap();
        assert!((engagement - 0.15).abs() < 1e-12);
        assert!(source.passive_engagement("missing", &track).await.is_err());
    }

    #[tokio::test]
    async fn test_fixed_mood_samples_repeat_last() {
        let source = FixedEngagement::new().with_mood_samples(vec![
            MoodVector::new(0.1, 0.1),
            MoodVector::new(0.5, 0.5),
        ]);
        assert_eq!(source.sample_mood("a", "b").await.unwrap(), MoodVector::new(0.1, 0.1));
        assert_eq!(source.sample_mood("a", "b").await.unwrap(), MoodVector::new(0.5, 0.5));
        assert_eq!(source.sample_mood("a", "b").await.unwrap(), MoodVector::new(0.5, 0.5));
    }

    #[tokio::test]
    async fn test_fixed_passive_defaults_to_zero() {
        let source = FixedEngagement::new().with_passive("room-a", 2.0);
        let track = Track::new("t1", "Song", "Artist");
        assert_eq!(source.passive_engagement("room-a", &track).await.unwrap(), 2.0);
        assert_eq!(source.passive_engagement("room-b", &track).await.unwrap(), 0.0);
    }
}
