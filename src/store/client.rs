use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

use crate::store::models::{CardDocument, FieldWrite, PlayerId, RoomDocument, RoomId};
use crate::store::{RoomStore, RoomUpdates, StoreError, StoreResult};

/// Typed per-room surface over the store, one per client.
///
/// Wraps the raw [`RoomStore`] operations for a single room and enforces
/// the client-side subscription discipline: at most one live subscription
/// per room per client, released exactly once.
#[derive(Clone)]
pub struct RoomClient {
    store: Arc<dyn RoomStore>,
    room: RoomId,
    subscribed: Arc<AtomicBool>,
}

impl RoomClient {
    /// Bind a client to one room.
    pub fn new(store: Arc<dyn RoomStore>, room: RoomId) -> Self {
        Self {
            store,
            room,
            subscribed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The room this client is bound to.
    pub fn room_id(&self) -> RoomId {
        self.room
    }

    /// Unconditional last-writer-wins write of one field.
    pub async fn update_field(&self, write: FieldWrite) -> StoreResult<()> {
        self.store.write_field(self.room, write).await
    }

    /// Write the two status sub-fields of one card.
    pub async fn update_card_status(
        &self,
        index: usize,
        revealed: bool,
        matched: bool,
    ) -> StoreResult<()> {
        self.store
            .write_card(self.room, index, revealed, matched)
            .await
    }

    /// Transactionally add a resolved pair to the player's score and
    /// return the committed document.
    pub async fn increment_score(&self, player: PlayerId) -> StoreResult<RoomDocument> {
        self.store.increment_score(self.room, player).await
    }

    /// Transactionally lay out the board, unless someone already did.
    pub async fn init_board(
        &self,
        cards: Vec<CardDocument>,
        first_turn: PlayerId,
    ) -> StoreResult<bool> {
        self.store.init_board(self.room, cards, first_turn).await
    }

    /// Open the room's snapshot stream. Refused while a previous
    /// subscription from this client is still live.
    pub async fn subscribe(&self) -> StoreResult<RoomUpdates> {
        if self.subscribed.swap(true, Ordering::SeqCst) {
            return Err(StoreError::Rejected(format!(
                "room `{}` already has a live subscription from this client",
                self.room
            )));
        }
        match self.store.subscribe(self.room).await {
            Ok(updates) => Ok(updates),
            Err(err) => {
                self.subscribed.store(false, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    /// Release the subscription guard. Dropping the stream returned by
    /// [`subscribe`](Self::subscribe) is what actually stops delivery;
    /// this records that the client left the room context. A second call
    /// is a logged no-op.
    pub fn stop_listening(&self) {
        if !self.subscribed.swap(false, Ordering::SeqCst) {
            warn!(room = %self.room, "stop_listening called without a live subscription");
        }
    }
}
