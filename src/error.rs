use thiserror::Error;

use crate::catalog::CatalogError;
use crate::directory::DirectoryError;
use crate::state::{AbortError, ApplyError, PlanError};
use crate::store::StoreError;

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Shared store unavailable or a store operation failed.
    #[error("store unavailable")]
    Unavailable(#[source] StoreError),
    /// An external collaborator (directory, catalog) failed.
    #[error("collaborator failure: {0}")]
    Collaborator(String),
    /// The image catalog cannot cover the configured board.
    #[error("card catalog too small: need {needed} distinct images, catalog has {available}")]
    CatalogExhausted {
        /// Distinct images the board requires.
        needed: usize,
        /// Distinct images the catalog provided.
        available: usize,
    },
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// The room's snapshot stream ended while the match was still live.
    #[error("room updates ended while the match was live")]
    SubscriptionClosed,
    /// Operation exceeded its timeout limit.
    #[error("operation timed out")]
    Timeout,
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl From<CatalogError> for ServiceError {
    fn from(err: CatalogError) -> Self {
        ServiceError::Collaborator(err.to_string())
    }
}

impl From<DirectoryError> for ServiceError {
    fn from(err: DirectoryError) -> Self {
        ServiceError::Collaborator(err.to_string())
    }
}

impl From<PlanError> for ServiceError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::AlreadyPending => {
                ServiceError::InvalidState("a turn action is already in flight".into())
            }
            PlanError::InvalidTransition(invalid) => ServiceError::InvalidState(invalid.to_string()),
        }
    }
}

impl From<ApplyError> for ServiceError {
    fn from(err: ApplyError) -> Self {
        match err {
            ApplyError::NoPending => ServiceError::InvalidState("no turn action is pending".into()),
            ApplyError::IdMismatch { .. } => {
                ServiceError::InvalidState("pending turn action does not match".into())
            }
            ApplyError::PhaseMismatch { expected, actual } => ServiceError::InvalidState(format!(
                "room moved on during the action (expected {expected:?}, got {actual:?})"
            )),
            ApplyError::VersionMismatch { expected, actual } => ServiceError::InvalidState(
                format!("room state version mismatch (expected {expected}, got {actual})"),
            ),
        }
    }
}

impl From<AbortError> for ServiceError {
    fn from(err: AbortError) -> Self {
        match err {
            AbortError::NoPending => ServiceError::InvalidState("no pending turn action".into()),
            AbortError::IdMismatch { .. } => {
                ServiceError::InvalidState("turn action plan does not match".into())
            }
        }
    }
}
