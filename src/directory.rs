//! User directory, an external collaborator.
//!
//! Profile storage and authentication live elsewhere in the application;
//! the engine only resolves display data and reports wins.

use dashmap::DashMap;
use futures::future::BoxFuture;
use std::sync::Arc;
use thiserror::Error;

use crate::store::models::PlayerId;

/// Public profile data for one player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    /// Stable identifier.
    pub id: PlayerId,
    /// Name shown to other players.
    pub display_name: String,
}

/// Error raised by directory implementations.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// No profile exists for the given id.
    #[error("unknown user `{0}`")]
    UnknownUser(PlayerId),
    /// The directory could not be reached.
    #[error("user directory unavailable: {0}")]
    Unavailable(String),
}

/// Lookup and win bookkeeping for player profiles.
///
/// `increment_wins` is fire-and-forget from the engine's point of view
/// and only promises at-least-once accounting.
pub trait UserDirectory: Send + Sync {
    /// Fetch a player's profile.
    fn get_user(&self, id: PlayerId) -> BoxFuture<'static, Result<UserProfile, DirectoryError>>;

    /// Add one win to the player's tally.
    fn increment_wins(&self, id: PlayerId) -> BoxFuture<'static, Result<(), DirectoryError>>;
}

#[derive(Debug, Clone)]
struct ProfileRecord {
    display_name: String,
    wins: u32,
}

/// Directory backed by an in-memory map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryUserDirectory {
    users: Arc<DashMap<PlayerId, ProfileRecord>>,
}

impl InMemoryUserDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a profile, replacing any previous one with the same id.
    pub fn register(&self, id: PlayerId, display_name: impl Into<String>) {
        self.users.insert(
            id,
            ProfileRecord {
                display_name: display_name.into(),
                wins: 0,
            },
        );
    }

    /// Current win tally for a player, if registered.
    pub fn wins_of(&self, id: PlayerId) -> Option<u32> {
        self.users.get(&id).map(|record| record.wins)
    }
}

impl UserDirectory for InMemoryUserDirectory {
    fn get_user(&self, id: PlayerId) -> BoxFuture<'static, Result<UserProfile, DirectoryError>> {
        let users = Arc::clone(&self.users);
        Box::pin(async move {
            users
                .get(&id)
                .map(|record| UserProfile {
                    id,
                    display_name: record.display_name.clone(),
                })
                .ok_or(DirectoryError::UnknownUser(id))
        })
    }

    fn increment_wins(&self, id: PlayerId) -> BoxFuture<'static, Result<(), DirectoryError>> {
        let users = Arc::clone(&self.users);
        Box::pin(async move {
            let mut record = users.get_mut(&id).ok_or(DirectoryError::UnknownUser(id))?;
            record.wins += 1;
            Ok(())
        })
    }
}
