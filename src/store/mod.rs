//! The shared state store: the single remote document both clients mutate.
//!
//! The engine never talks to a concrete backend directly; everything goes
//! through [`RoomStore`]. The trait's contract carries the load-bearing
//! semantics of the original backing service: per-room snapshot
//! subscriptions, last-writer-wins field writes with no cross-field
//! atomicity, optimistic read-modify-write transactions with automatic
//! retry, and commit-on-disconnect registrations scoped to a client
//! session. Any replacement backend must reproduce those semantics.

/// Per-room typed client surface.
pub mod client;
mod error;
/// In-process backend reproducing the remote store's semantics.
pub mod memory;
/// Persisted document shapes and field writes.
pub mod models;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use uuid::Uuid;

pub use error::{StoreError, StoreResult};

use self::models::{CardDocument, FieldWrite, PlayerId, RoomDocument, RoomId};

/// Identifier of one client connection at the store.
///
/// Disconnect commitments live at this scope: they fire when the session
/// closes, however it closes, unless cancelled first.
pub type SessionId = Uuid;

/// Stream of full-document snapshots for one room.
///
/// The first item is the current value; later items follow writes in
/// order, though a slow consumer may observe only the latest state.
/// The stream ends when the room is deleted.
pub type RoomUpdates = BoxStream<'static, RoomDocument>;

/// Abstraction over the shared room store.
pub trait RoomStore: Send + Sync {
    /// Open a connection-scoped session for disconnect commitments.
    fn open_session(&self) -> BoxFuture<'static, StoreResult<SessionId>>;

    /// Close a session. Commitments registered on it and not cancelled
    /// fire now, whether the close was graceful or not.
    fn close_session(&self, session: SessionId) -> BoxFuture<'static, StoreResult<()>>;

    /// Matchmaking transaction: join the oldest waiting room with a free
    /// seat, or create a fresh one owned by the seeker. Atomic relative to
    /// concurrent seekers.
    fn join_or_create_room(&self, seeker: PlayerId)
    -> BoxFuture<'static, StoreResult<RoomDocument>>;

    /// Delete a room, but only while it is still waiting with a free
    /// seat. Returns whether anything was deleted.
    fn delete_waiting_room(&self, room: RoomId) -> BoxFuture<'static, StoreResult<bool>>;

    /// Delete a room whose board was never laid out, even if a second
    /// player already joined. Deletion ends the room's subscriptions,
    /// which is how the other seat learns the match is off. A room with
    /// cards, and a finished room, are left intact. Returns whether
    /// anything was deleted.
    fn delete_unstarted_room(&self, room: RoomId) -> BoxFuture<'static, StoreResult<bool>>;

    /// Unconditional last-writer-wins write of a single field.
    fn write_field(
        &self,
        room: RoomId,
        write: FieldWrite,
    ) -> BoxFuture<'static, StoreResult<()>>;

    /// Write the two status sub-fields of one card by index.
    fn write_card(
        &self,
        room: RoomId,
        index: usize,
        revealed: bool,
        matched: bool,
    ) -> BoxFuture<'static, StoreResult<()>>;

    /// Transaction: add one resolved pair to the given player's score.
    /// Returns the committed document.
    fn increment_score(
        &self,
        room: RoomId,
        player: PlayerId,
    ) -> BoxFuture<'static, StoreResult<RoomDocument>>;

    /// Transaction: lay out the board and assign the first turn, but only
    /// if the board is still empty. Returns whether this call wrote it.
    fn init_board(
        &self,
        room: RoomId,
        cards: Vec<CardDocument>,
        first_turn: PlayerId,
    ) -> BoxFuture<'static, StoreResult<bool>>;

    /// Subscribe to the room's snapshot stream.
    fn subscribe(&self, room: RoomId) -> BoxFuture<'static, StoreResult<RoomUpdates>>;

    /// Register the writes to apply should this session disconnect.
    /// Replaces any writes previously registered for the same room.
    fn register_on_disconnect(
        &self,
        session: SessionId,
        room: RoomId,
        writes: Vec<FieldWrite>,
    ) -> BoxFuture<'static, StoreResult<()>>;

    /// Cancel the disconnect writes registered for the given room.
    fn cancel_on_disconnect(
        &self,
        session: SessionId,
        room: RoomId,
    ) -> BoxFuture<'static, StoreResult<()>>;
}
