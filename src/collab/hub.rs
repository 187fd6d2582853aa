//! Shared-document transport.
//!
//! Sessions exchange whole document snapshots: every local commit exports
//! the document and publishes it to the room, every subscriber imports
//! what it receives. Imports are merges, so a session that misses an
//! update converges again on the next one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;
use uuid::Uuid;

use crate::error::CollabError;

/// One published document snapshot.
#[derive(Debug, Clone)]
pub struct RoomUpdate {
    pub publisher: Uuid,
    pub snapshot: Vec<u8>,
}

/// A session's connection to one room.
///
/// `latest` is updated before the broadcast goes out, so a handle issued
/// to a late joiner always carries at least the state that was visible
/// when it was created.
pub struct RoomHandle {
    publisher: Uuid,
    latest: Arc<StdMutex<Vec<u8>>>,
    sender: broadcast::Sender<RoomUpdate>,
    updates: Option<broadcast::Receiver<RoomUpdate>>,
}

impl RoomHandle {
    fn new(latest: Arc<StdMutex<Vec<u8>>>, sender: broadcast::Sender<RoomUpdate>) -> Self {
        let updates = sender.subscribe();
        Self {
            publisher: Uuid::new_v4(),
            latest,
            sender,
            updates: Some(updates),
        }
    }

    /// Identity of this handle's publisher, used to skip own updates.
    pub fn publisher(&self) -> Uuid {
        self.publisher
    }

    /// The most recently published snapshot of the room.
    pub fn latest_snapshot(&self) -> Vec<u8> {
        self.latest
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Publish a snapshot to every other handle on the room.
    pub fn publish(&self, snapshot: Vec<u8>) {
        if let Ok(mut latest) = self.latest.lock() {
            *latest = snapshot.clone();
        }
        // no subscribers is fine, the snapshot is still recorded above
        let _ = self.sender.send(RoomUpdate {
            publisher: self.publisher,
            snapshot,
        });
    }

    /// Take the update stream. Yields `None` after the first call.
    pub fn take_updates(&mut self) -> Option<broadcast::Receiver<RoomUpdate>> {
        self.updates.take()
    }
}

/// The service that hosts shared documents, one per room.
#[async_trait]
pub trait SharedDocService: Send + Sync {
    /// Register a new room seeded with `initial_snapshot`.
    async fn create_room(
        &self,
        room_id: &str,
        initial_snapshot: Vec<u8>,
    ) -> Result<RoomHandle, CollabError>;

    /// Connect to an existing room.
    async fn join_room(&self, room_id: &str) -> Result<RoomHandle, CollabError>;
}

struct Room {
    latest: Arc<StdMutex<Vec<u8>>>,
    sender: broadcast::Sender<RoomUpdate>,
}

/// In-process room registry.
#[derive(Default)]
pub struct LocalDocHub {
    rooms: Mutex<HashMap<String, Room>>,
}

impl LocalDocHub {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SharedDocService for LocalDocHub {
    async fn create_room(
        &self,
        room_id: &str,
        initial_snapshot: Vec<u8>,
    ) -> Result<RoomHandle, CollabError> {
        let mut rooms = self.rooms.lock().await;
        if rooms.contains_key(room_id) {
            return Err(CollabError::RoomExists(room_id.to_string()));
        }

        let (sender, _) = broadcast::channel(256);
        let latest = Arc::new(StdMutex::new(initial_snapshot));
        debug!(room_id, "room created");
        rooms.insert(
            room_id.to_string(),
            Room {
                latest: latest.clone(),
                sender: sender.clone(),
            },
        );
        Ok(RoomHandle::new(latest, sender))
    }

    async fn join_room(&self, room_id: &str) -> Result<RoomHandle, CollabError> {
        let rooms = self.rooms.lock().await;
        let room = rooms
            .get(room_id)
            .ok_or_else(|| CollabError::RoomNotFound(room_id.to_string()))?;
        debug!(room_id, "room joined");
        Ok(RoomHandle::new(room.latest.clone(), room.sender.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_join_sees_latest_snapshot() {
        let hub = LocalDocHub::new();
        let owner = hub.create_room("room-1", b"seed".to_vec()).await.unwrap();
        owner.publish(b"v2".to_vec());

        let guest = hub.join_room("room-1").await.unwrap();
        assert_eq!(guest.latest_snapshot(), b"v2");
    }

    #[tokio::test]
    async fn duplicate_create_and_unknown_join_fail() {
        let hub = LocalDocHub::new();
        hub.create_room("room-1", Vec::new()).await.unwrap();

        assert!(matches!(
            hub.create_room("room-1", Vec::new()).await,
            Err(CollabError::RoomExists(_))
        ));
        assert!(matches!(
            hub.join_room("room-2").await,
            Err(CollabError::RoomNotFound(_))
        ));
    }

    #[tokio::test]
    async fn publishes_reach_other_handles_but_carry_the_publisher() {
        let hub = LocalDocHub::new();
        let owner = hub.create_room("room-1", Vec::new()).await.unwrap();
        let mut guest = hub.join_room("room-1").await.unwrap();
        let mut updates = guest.take_updates().unwrap();
        assert!(guest.take_updates().is_none());

        owner.publish(b"change".to_vec());
        let update = updates.recv().await.unwrap();
        assert_eq!(update.publisher, owner.publisher());
        assert_eq!(update.snapshot, b"change");
    }
}
