//! Test fixtures for integration testing

use async_trait::async_trait;
use chrono::Utc;
use mood_bridge::amqp::MockEventBroadcaster;
use mood_bridge::config::{MatchingConfig, SessionConfig};
use mood_bridge::directory::{
    InMemoryCatalog, InMemoryRoomDirectory, InMemorySnapshotStore, RoomDirectory,
};
use mood_bridge::error::{BridgeError, Result};
use mood_bridge::matching::{MatchingEngine, MatchingOptions};
use mood_bridge::mood::fuse_participants;
use mood_bridge::session::{FixedEngagement, SessionCollaborators, SessionManager};
use mood_bridge::types::{Participant, RoomSnapshot, Track};
use mood_bridge::utils::ManualClock;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Top tracks for a room, most played first
pub fn tracks(prefix: &str, count: usize) -> Vec<Track> {
    (0..count)
        .map(|i| {
            Track::new(format!("{}-{}", prefix, i), format!("Song {}", i), "Artist")
                .with_play_count(100 - i as u32)
        })
        .collect()
}

/// A snapshot with `size` participants sharing one mood
pub fn snapshot(room_id: &str, mood: &str, size: usize) -> RoomSnapshot {
    RoomSnapshot {
        participants: (0..size)
            .map(|i| Participant::new(format!("{}-user-{}", room_id, i), mood, 0.9))
            .collect(),
        top_tracks: tracks(room_id, 4),
    }
}

/// Directory wrapper that fails lookups for selected rooms, as an unreachable
/// upstream would
pub struct FlakyDirectory {
    inner: Arc<InMemoryRoomDirectory>,
    failing: Mutex<HashSet<String>>,
}

impl FlakyDirectory {
    pub fn new(inner: Arc<InMemoryRoomDirectory>) -> Self {
        Self {
            inner,
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_room(&self, room_id: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(room_id.to_string());
        }
    }

    pub fn heal_room(&self, room_id: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.remove(room_id);
        }
    }
}

#[async_trait]
impl RoomDirectory for FlakyDirectory {
    async fn get_room_snapshot(&self, room_id: &str) -> Result<RoomSnapshot> {
        let failing = self
            .failing
            .lock()
            .map(|failing| failing.contains(room_id))
            .unwrap_or(false);
        if failing {
            return Err(BridgeError::Upstream {
                collaborator: "room directory".to_string(),
                message: format!("timed out fetching {}", room_id),
            }
            .into());
        }
        self.inner.get_room_snapshot(room_id).await
    }
}

/// The matching engine and session manager wired together the way the
/// service wires them, with a manual wall clock and a recording broadcaster
pub struct TestSystem {
    pub rooms: Arc<InMemoryRoomDirectory>,
    pub directory: Arc<FlakyDirectory>,
    pub sessions: SessionManager,
    pub matching: MatchingEngine,
    pub broadcaster: Arc<MockEventBroadcaster>,
    pub snapshots: Arc<InMemorySnapshotStore>,
    pub clock: Arc<ManualClock>,
}

impl TestSystem {
    pub fn new() -> Self {
        Self::with_engagement(FixedEngagement::new())
    }

    pub fn with_engagement(engagement: FixedEngagement) -> Self {
        let rooms = Arc::new(InMemoryRoomDirectory::new());
        let directory = Arc::new(FlakyDirectory::new(rooms.clone()));
        let broadcaster = Arc::new(MockEventBroadcaster::new());
        let snapshots = Arc::new(InMemorySnapshotStore::default());
        let clock = Arc::new(ManualClock::new(Utc::now()));

        let sessions = SessionManager::new(
            SessionConfig::default(),
            SessionCollaborators {
                directory: directory.clone(),
                snapshots: snapshots.clone(),
                catalog: Arc::new(InMemoryCatalog::new()),
                engagement: Arc::new(engagement),
                broadcaster: broadcaster.clone(),
            },
        )
        .with_clock(clock.clone());

        let matching = MatchingEngine::new(
            MatchingConfig::default(),
            broadcaster.clone(),
            Arc::new(sessions.clone()),
        )
        .with_clock(clock.clone());

        Self {
            rooms,
            directory,
            sessions,
            matching,
            broadcaster,
            snapshots,
            clock,
        }
    }

    /// Put a room into the directory
    pub fn add_room(&self, room_id: &str, mood: &str, size: usize) {
        self.rooms
            .upsert_room(room_id, snapshot(room_id, mood, size))
            .unwrap();
    }

    /// Put a room into the directory and opt it into matching with its
    /// fused participant mood. Returns the anonymous id.
    pub fn add_registered_room(&self, room_id: &str, mood: &str, size: usize) -> String {
        let snapshot = snapshot(room_id, mood, size);
        let fused = fuse_participants(&snapshot.participants);
        self.rooms.upsert_room(room_id, snapshot).unwrap();
        self.matching
            .register(room_id, Some(&fused), size, MatchingOptions::default())
            .unwrap()
    }

    pub async fn shutdown(&self) {
        self.matching.shutdown();
        self.sessions.shutdown().await.unwrap();
    }
}
