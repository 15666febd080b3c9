use std::sync::Arc;

use tracing::info;

use crate::error::ServiceError;
use crate::state::room::Room;
use crate::store::RoomStore;
use crate::store::models::{PlayerId, RoomId};

/// Finds a waiting room for a seeker, or creates one.
pub struct RoomMatchmaker {
    store: Arc<dyn RoomStore>,
}

impl RoomMatchmaker {
    /// Build a matchmaker over the given store.
    pub fn new(store: Arc<dyn RoomStore>) -> Self {
        Self { store }
    }

    /// Join the oldest waiting room, or create a fresh one owned by the
    /// seeker. Atomic relative to concurrent seekers: two simultaneous
    /// callers end up in the same room, one per seat, or in two distinct
    /// rooms, never sharing a seat.
    pub async fn find_or_create(&self, seeker: PlayerId) -> Result<Room, ServiceError> {
        let room: Room = self.store.join_or_create_room(seeker).await?.into();
        if room.player_two.is_some() {
            info!(room = %room.id, player = %seeker, "joined a waiting room");
        } else {
            info!(room = %room.id, player = %seeker, "created a room, waiting for an opponent");
        }
        Ok(room)
    }

    /// Reverse a room creation. Succeeds only while the room is still
    /// waiting with a free seat, so a room an opponent just joined is
    /// never destroyed. Returns whether the room was deleted.
    pub async fn cancel(&self, room: RoomId) -> Result<bool, ServiceError> {
        let deleted = self.store.delete_waiting_room(room).await?;
        if deleted {
            info!(%room, "cancelled a waiting room");
        }
        Ok(deleted)
    }

    /// Tear down a room whose board could not be built. Unlike
    /// [`cancel`](Self::cancel) this also removes a room the opponent
    /// already joined: deleting it ends their subscription, which is how
    /// they learn the match is off. A room with a board, and a finished
    /// room, are left intact. Returns whether the room was deleted.
    pub async fn abandon_setup(&self, room: RoomId) -> Result<bool, ServiceError> {
        let deleted = self.store.delete_unstarted_room(room).await?;
        if deleted {
            info!(%room, "tore down a room that never got a board");
        }
        Ok(deleted)
    }
}
