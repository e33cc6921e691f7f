//! Room directory collaborator
//!
//! The directory reports who is currently in a room, what mood each
//! participant last tagged, and the room's most played tracks. The service
//! treats it as an external dependency and only talks to it through
//! [`RoomDirectory`].

use crate::error::{BridgeError, Result};
use crate::types::{RoomId, RoomSnapshot};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

/// Read access to live room state
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    /// Current participants and top tracks of a room.
    ///
    /// Fails with [`BridgeError::RoomNotFound`] if the room is unknown.
    async fn get_room_snapshot(&self, room_id: &str) -> Result<RoomSnapshot>;
}

/// Directory kept in process, fed by upstream room sync commands
#[derive(Debug, Default)]
pub struct InMemoryRoomDirectory {
    rooms: RwLock<HashMap<RoomId, RoomSnapshot>>,
}

impl InMemoryRoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the full snapshot of a room
    pub fn upsert_room(&self, room_id: impl Into<RoomId>, snapshot: RoomSnapshot) -> Result<()> {
        let room_id = room_id.into();
        let mut rooms = self
            .rooms
            .write()
            .map_err(|_| BridgeError::internal("Failed to acquire rooms write lock"))?;

        debug!(
            "Directory sync for room {}: {} participants, {} tracks",
            room_id,
            snapshot.participants.len(),
            snapshot.top_tracks.len()
        );
        rooms.insert(room_id, snapshot);
        Ok(())
    }
}

#[async_trait]
impl RoomDirectory for InMemoryRoomDirectory {
    async fn get_room_snapshot(&self, room_id: &str) -> Result<RoomSnapshot> {
        let rooms = self
            .rooms
            .read()
            .map_err(|_| BridgeError::internal("Failed to acquire rooms read lock"))?;

        rooms.get(room_id).cloned().ok_or_else(|| {
            BridgeError::RoomNotFound {
                room_id: room_id.to_string(),
            }
            .into()
        })
    }
}
