use std::error::Error;

use thiserror::Error;
use uuid::Uuid;

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Error raised by store backends regardless of the underlying transport.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend unreachable or a request failed in transit.
    #[error("store unavailable: {message}")]
    Unavailable {
        /// Human readable description of the failure.
        message: String,
        /// Underlying backend failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// An optimistic transaction kept colliding with concurrent writers.
    #[error("transaction gave up after {attempts} conflicting attempts")]
    Contention {
        /// Number of attempts made before giving up.
        attempts: usize,
    },
    /// The room document does not exist (never created, or deleted).
    #[error("room `{0}` does not exist")]
    Missing(Uuid),
    /// The store refused a write: unknown session, index out of bounds,
    /// or a player id the document does not reference.
    #[error("write rejected: {0}")]
    Rejected(String),
}

impl StoreError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StoreError::Unavailable {
            message,
            source: Box::new(source),
        }
    }
}
