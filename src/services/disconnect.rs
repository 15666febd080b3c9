use std::sync::Arc;

use tracing::{debug, info};

use crate::error::ServiceError;
use crate::store::models::{FieldWrite, PlayerId, RoomId, RoomStatus, Winner};
use crate::store::{RoomStore, SessionId};

/// Keeps the forfeit-on-disconnect commitment for the active room.
///
/// While armed, the store itself will mark the room finished with the
/// opponent as winner should this client's session drop. The guard must
/// be disarmed as soon as the room finishes through any other path, so a
/// later connection drop cannot overwrite a settled outcome.
pub struct DisconnectGuard {
    store: Arc<dyn RoomStore>,
    session: SessionId,
    armed_for: Option<(RoomId, PlayerId)>,
}

impl DisconnectGuard {
    /// Build a guard bound to one store session.
    pub fn new(store: Arc<dyn RoomStore>, session: SessionId) -> Self {
        Self {
            store,
            session,
            armed_for: None,
        }
    }

    /// Whether a commitment is currently registered.
    pub fn is_armed(&self) -> bool {
        self.armed_for.is_some()
    }

    /// Register the forfeit commitment for the given room and opponent,
    /// replacing any previous registration. A repeat call for the same
    /// room and opponent is a no-op.
    pub async fn arm(&mut self, room: RoomId, opponent: PlayerId) -> Result<(), ServiceError> {
        if self.armed_for == Some((room, opponent)) {
            return Ok(());
        }

        self.store
            .register_on_disconnect(
                self.session,
                room,
                vec![
                    FieldWrite::Status(RoomStatus::Finished),
                    FieldWrite::Winner(Some(Winner::Player(opponent))),
                ],
            )
            .await?;
        self.armed_for = Some((room, opponent));
        info!(%room, %opponent, "armed forfeit-on-disconnect");
        Ok(())
    }

    /// Cancel the commitment for the given room. Safe to call repeatedly.
    pub async fn disarm(&mut self, room: RoomId) -> Result<(), ServiceError> {
        if self.armed_for.is_none() {
            return Ok(());
        }
        self.store.cancel_on_disconnect(self.session, room).await?;
        self.armed_for = None;
        debug!(%room, "disarmed forfeit-on-disconnect");
        Ok(())
    }
}
