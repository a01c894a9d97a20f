/// Errors from document store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested document does not exist or was deleted.
    #[error("document not found: {0:?}")]
    NotFound(String),

    /// The write named a revision other than the stored one.
    #[error("revision conflict on {id:?}")]
    Conflict { id: String },

    /// The backing store cannot be reached or has been closed.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The operation is not offered by this adapter (e.g. search on a remote).
    #[error("operation not supported by this store: {0}")]
    Unsupported(&'static str),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the snapshot file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
