use std::error::Error;
use thiserror::Error;
use uuid::Uuid;

/// Result alias for invitation store operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Failure of an invitation store, whatever the backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached or refused the request.
    #[error("invitation store unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// A persisted row breaks the invitation invariants (e.g. a session on a
    /// non-accepted invitation).
    #[error("stored invitation {id} is inconsistent: {reason}")]
    Corrupt { id: Uuid, reason: String },
}

impl StorageError {
    /// Wrap any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Report a row whose columns contradict each other.
    pub fn corrupt(id: Uuid, reason: impl Into<String>) -> Self {
        StorageError::Corrupt {
            id,
            reason: reason.into(),
        }
    }
}
