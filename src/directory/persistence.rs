//! Durable memory snapshots of fused moods and playlists

use crate::error::{BridgeError, Result};
use crate::mood::FusedMood;
use crate::types::{RoomId, Track};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use uuid::Uuid;

/// A stored snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub memory_id: String,
    pub room_id: RoomId,
    pub fused_mood: FusedMood,
    pub playlist: Vec<Track>,
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

/// Persistence store for room memories
///
/// Callers treat saves as fire-and-forget: a failed save never rolls back
/// session or battle state.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist a snapshot and return its memory id
    async fn save_snapshot(
        &self,
        room_id: &str,
        fused_mood: &FusedMood,
        playlist: &[Track],
        metadata: HashMap<String, String>,
    ) -> Result<String>;
}

/// Bounded in-process snapshot store; the oldest entries are evicted first
#[derive(Debug)]
pub struct InMemorySnapshotStore {
    snapshots: Mutex<VecDeque<MemorySnapshot>>,
    capacity: usize,
}

impl InMemorySnapshotStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            snapshots: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// All snapshots stored for a room, oldest first
    pub fn snapshots_for(&self, room_id: &str) -> Vec<MemorySnapshot> {
        self.snapshots
            .lock()
            .map(|snapshots| {
                snapshots
                    .iter()
                    .filter(|snapshot| snapshot.room_id == room_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.snapshots.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemorySnapshotStore {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save_snapshot(
        &self,
        room_id: &str,
        fused_mood: &FusedMood,
        playlist: &[Track],
        metadata: HashMap<String, String>,
    ) -> Result<String> {
        let memory_id = format!("mem_{}", Uuid::new_v4().simple());
        let snapshot = MemorySnapshot {
            memory_id: memory_id.clone(),
            room_id: room_id.to_string(),
            fused_mood: fused_mood.clone(),
            playlist: playlist.to_vec(),
            metadata,
            created_at: Utc::now(),
        };

        let mut snapshots = self
            .snapshots
            .lock()
            .map_err(|_| BridgeError::internal("Failed to acquire snapshots lock"))?;

        snapshots.push_back(snapshot);
        while snapshots.len() > self.capacity {
            snapshots.pop_front();
        }

        Ok(memory_id)
    }
}
