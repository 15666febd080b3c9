use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use dashmap::DashMap;
use futures::StreamExt;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use tokio::sync::{RwLock, watch};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::store::models::{CardDocument, FieldWrite, PlayerId, RoomDocument, RoomId, RoomStatus};
use crate::store::{RoomStore, RoomUpdates, SessionId, StoreError, StoreResult};

/// Attempts an optimistic transaction makes before reporting contention.
const MAX_TRANSACTION_ATTEMPTS: usize = 5;

/// Outcome a transaction body reports back to the commit loop.
enum TxDecision {
    Commit,
    Skip,
}

struct RoomSlot {
    version: u64,
    doc: RoomDocument,
    updates: watch::Sender<RoomDocument>,
}

struct Inner {
    /// Rooms in creation order; the matchmaking scan walks oldest first.
    rooms: RwLock<IndexMap<RoomId, RoomSlot>>,
    /// Uncancelled disconnect commitments, keyed by session.
    sessions: DashMap<SessionId, HashMap<RoomId, Vec<FieldWrite>>>,
}

/// In-process [`RoomStore`] backend.
///
/// Versioned documents give the two transactional operations real
/// optimistic read-modify-write semantics (bounded retry on a version
/// race); everything else is a last-writer-wins field write. Every write
/// fans the full document out to the room's subscribers through a watch
/// channel, so a slow consumer observes the latest state rather than
/// every intermediate one.
#[derive(Clone)]
pub struct MemoryRoomStore {
    inner: Arc<Inner>,
}

impl MemoryRoomStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                rooms: RwLock::new(IndexMap::new()),
                sessions: DashMap::new(),
            }),
        }
    }

    /// Read the current document of a room.
    pub async fn room(&self, room: RoomId) -> StoreResult<RoomDocument> {
        let rooms = self.inner.rooms.read().await;
        rooms
            .get(&room)
            .map(|slot| slot.doc.clone())
            .ok_or(StoreError::Missing(room))
    }

    #[cfg(test)]
    pub(crate) async fn room_count(&self) -> usize {
        self.inner.rooms.read().await.len()
    }

    /// Run one last-writer-wins mutation under the write lock and fan the
    /// result out to subscribers.
    async fn write_locked<F>(&self, room: RoomId, mutate: F) -> StoreResult<()>
    where
        F: FnOnce(&mut RoomDocument) -> StoreResult<()>,
    {
        let mut rooms = self.inner.rooms.write().await;
        let slot = rooms.get_mut(&room).ok_or(StoreError::Missing(room))?;
        mutate(&mut slot.doc)?;
        slot.doc.updated_at = SystemTime::now();
        slot.version += 1;
        slot.updates.send_replace(slot.doc.clone());
        Ok(())
    }

    /// Optimistic read-modify-write with bounded retry.
    ///
    /// The body runs against a copy taken outside the write lock; the
    /// commit re-checks the document version and starts over from fresh
    /// state when a concurrent writer got in between. Returns the
    /// resulting document and whether this call committed anything.
    async fn transact<F>(&self, room: RoomId, mut body: F) -> StoreResult<(RoomDocument, bool)>
    where
        F: FnMut(&mut RoomDocument) -> StoreResult<TxDecision>,
    {
        for attempt in 1..=MAX_TRANSACTION_ATTEMPTS {
            let (base_version, mut draft) = {
                let rooms = self.inner.rooms.read().await;
                let slot = rooms.get(&room).ok_or(StoreError::Missing(room))?;
                (slot.version, slot.doc.clone())
            };

            match body(&mut draft)? {
                TxDecision::Skip => return Ok((draft, false)),
                TxDecision::Commit => {}
            }

            let mut rooms = self.inner.rooms.write().await;
            let slot = rooms.get_mut(&room).ok_or(StoreError::Missing(room))?;
            if slot.version != base_version {
                debug!(%room, attempt, "transaction raced a concurrent writer, retrying");
                continue;
            }

            draft.updated_at = SystemTime::now();
            slot.version += 1;
            slot.doc = draft.clone();
            slot.updates.send_replace(draft.clone());
            return Ok((draft, true));
        }

        Err(StoreError::Contention {
            attempts: MAX_TRANSACTION_ATTEMPTS,
        })
    }

    async fn do_join_or_create(&self, seeker: PlayerId) -> StoreResult<RoomDocument> {
        let mut rooms = self.inner.rooms.write().await;

        let open_seat = rooms.values_mut().find(|slot| {
            slot.doc.status == RoomStatus::Waiting
                && slot.doc.player_two.is_none()
                && slot.doc.player_one != seeker
        });

        if let Some(slot) = open_seat {
            slot.doc.player_two = Some(seeker);
            slot.doc.status = RoomStatus::Playing;
            slot.doc.updated_at = SystemTime::now();
            slot.version += 1;
            slot.updates.send_replace(slot.doc.clone());
            debug!(room = %slot.doc.id, player = %seeker, "seeker joined a waiting room");
            return Ok(slot.doc.clone());
        }

        let doc = RoomDocument::waiting(seeker);
        let (updates, _) = watch::channel(doc.clone());
        rooms.insert(
            doc.id,
            RoomSlot {
                version: 0,
                doc: doc.clone(),
                updates,
            },
        );
        debug!(room = %doc.id, player = %seeker, "created a fresh waiting room");
        Ok(doc)
    }

    async fn do_delete_waiting(&self, room: RoomId) -> StoreResult<bool> {
        let mut rooms = self.inner.rooms.write().await;
        let still_waiting = rooms
            .get(&room)
            .is_some_and(|slot| slot.doc.status == RoomStatus::Waiting && slot.doc.player_two.is_none());
        if !still_waiting {
            return Ok(false);
        }
        // Dropping the slot drops the watch sender, ending subscriptions.
        rooms.shift_remove(&room);
        Ok(true)
    }

    async fn do_delete_unstarted(&self, room: RoomId) -> StoreResult<bool> {
        let mut rooms = self.inner.rooms.write().await;
        let unstarted = rooms
            .get(&room)
            .is_some_and(|slot| slot.doc.cards.is_empty() && slot.doc.status != RoomStatus::Finished);
        if !unstarted {
            return Ok(false);
        }
        rooms.shift_remove(&room);
        Ok(true)
    }

    async fn do_increment_score(
        &self,
        room: RoomId,
        player: PlayerId,
    ) -> StoreResult<RoomDocument> {
        let (doc, _) = self
            .transact(room, |doc| {
                if player == doc.player_one {
                    doc.player_one_score += 1;
                } else if doc.player_two == Some(player) {
                    doc.player_two_score += 1;
                } else {
                    return Err(StoreError::Rejected(format!(
                        "player `{player}` is not seated in room `{room}`"
                    )));
                }
                Ok(TxDecision::Commit)
            })
            .await?;
        Ok(doc)
    }

    async fn do_init_board(
        &self,
        room: RoomId,
        cards: Vec<CardDocument>,
        first_turn: PlayerId,
    ) -> StoreResult<bool> {
        let (_, committed) = self
            .transact(room, |doc| {
                if !doc.cards.is_empty() {
                    return Ok(TxDecision::Skip);
                }
                doc.cards = cards.clone();
                doc.current_turn = first_turn;
                doc.first_selected = None;
                doc.processing_match = false;
                Ok(TxDecision::Commit)
            })
            .await?;
        Ok(committed)
    }

    async fn do_subscribe(&self, room: RoomId) -> StoreResult<RoomUpdates> {
        let rooms = self.inner.rooms.read().await;
        let slot = rooms.get(&room).ok_or(StoreError::Missing(room))?;
        Ok(WatchStream::new(slot.updates.subscribe()).boxed())
    }

    async fn do_close_session(&self, session: SessionId) -> StoreResult<()> {
        let Some((_, commitments)) = self.inner.sessions.remove(&session) else {
            return Ok(());
        };

        if commitments.is_empty() {
            return Ok(());
        }

        info!(%session, rooms = commitments.len(), "applying disconnect commitments");
        for (room, writes) in commitments {
            let outcome = self
                .write_locked(room, |doc| {
                    for write in &writes {
                        write.apply(doc);
                    }
                    Ok(())
                })
                .await;
            if let Err(err) = outcome {
                warn!(%session, %room, error = %err, "disconnect commitment could not be applied");
            }
        }
        Ok(())
    }
}

impl Default for MemoryRoomStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomStore for MemoryRoomStore {
    fn open_session(&self) -> BoxFuture<'static, StoreResult<SessionId>> {
        let store = self.clone();
        Box::pin(async move {
            let session = Uuid::new_v4();
            store.inner.sessions.insert(session, HashMap::new());
            Ok(session)
        })
    }

    fn close_session(&self, session: SessionId) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.do_close_session(session).await })
    }

    fn join_or_create_room(
        &self,
        seeker: PlayerId,
    ) -> BoxFuture<'static, StoreResult<RoomDocument>> {
        let store = self.clone();
        Box::pin(async move { store.do_join_or_create(seeker).await })
    }

    fn delete_waiting_room(&self, room: RoomId) -> BoxFuture<'static, StoreResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.do_delete_waiting(room).await })
    }

    fn delete_unstarted_room(&self, room: RoomId) -> BoxFuture<'static, StoreResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.do_delete_unstarted(room).await })
    }

    fn write_field(&self, room: RoomId, write: FieldWrite) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .write_locked(room, |doc| {
                    write.apply(doc);
                    Ok(())
                })
                .await
        })
    }

    fn write_card(
        &self,
        room: RoomId,
        index: usize,
        revealed: bool,
        matched: bool,
    ) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .write_locked(room, |doc| {
                    let len = doc.cards.len();
                    let card = doc.cards.get_mut(index).ok_or_else(|| {
                        StoreError::Rejected(format!(
                            "card index {index} out of bounds for a board of {len}"
                        ))
                    })?;
                    card.revealed = revealed;
                    card.matched = matched;
                    Ok(())
                })
                .await
        })
    }

    fn increment_score(
        &self,
        room: RoomId,
        player: PlayerId,
    ) -> BoxFuture<'static, StoreResult<RoomDocument>> {
        let store = self.clone();
        Box::pin(async move { store.do_increment_score(room, player).await })
    }

    fn init_board(
        &self,
        room: RoomId,
        cards: Vec<CardDocument>,
        first_turn: PlayerId,
    ) -> BoxFuture<'static, StoreResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.do_init_board(room, cards, first_turn).await })
    }

    fn subscribe(&self, room: RoomId) -> BoxFuture<'static, StoreResult<RoomUpdates>> {
        let store = self.clone();
        Box::pin(async move { store.do_subscribe(room).await })
    }

    fn register_on_disconnect(
        &self,
        session: SessionId,
        room: RoomId,
        writes: Vec<FieldWrite>,
    ) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let mut entry = store
                .inner
                .sessions
                .get_mut(&session)
                .ok_or_else(|| StoreError::Rejected(format!("session `{session}` is not open")))?;
            entry.insert(room, writes);
            Ok(())
        })
    }

    fn cancel_on_disconnect(
        &self,
        session: SessionId,
        room: RoomId,
    ) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            if let Some(mut entry) = store.inner.sessions.get_mut(&session) {
                entry.remove(&room);
            }
            Ok(())
        })
    }
}
