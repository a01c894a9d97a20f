//! Error types for item manager operations.

use lectern_store::StoreError;

/// Errors surfaced by [`ItemsManager`](crate::ItemsManager) implementations.
///
/// Each failure mode callers react to differently has its own variant: a
/// read-only manager is a permanent refusal, a stale reference means the
/// caller should re-list, and an unavailable backing is worth retrying later.
#[derive(Debug, thiserror::Error)]
pub enum ItemsError {
    /// The manager (or the ref's manager) refuses mutations.
    #[error("manager is read-only")]
    ReadOnly,

    /// The ref no longer designates an item held by its manager.
    #[error("stale reference: {0}")]
    StaleReference(String),

    /// Optimistic-concurrency write collision.
    #[error("write conflict on {id}")]
    Conflict { id: String },

    /// The requested item does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The backing store cannot be reached.
    #[error("backing store unavailable: {0}")]
    BackingUnavailable(String),

    /// An object could not be encoded to or decoded from its stored form.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ItemsError {
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::ReadOnly)
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Self::StaleReference(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<StoreError> for ItemsError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => Self::NotFound(id),
            StoreError::Conflict { id } => Self::Conflict { id },
            StoreError::Unavailable(reason) => Self::BackingUnavailable(reason),
            StoreError::Unsupported(op) => {
                Self::BackingUnavailable(format!("{op} is not offered by this store"))
            }
            StoreError::Serialization(reason) => Self::Serialization(reason),
            StoreError::Io(err) => Self::BackingUnavailable(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ItemsError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result alias for item manager operations.
pub type ItemsResult<T> = Result<T, ItemsError>;
