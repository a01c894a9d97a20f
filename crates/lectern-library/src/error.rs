use lectern_items::ItemsError;
use lectern_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error(transparent)]
    Items(#[from] ItemsError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("library not found: {0}")]
    LibraryNotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for LibraryError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Library failures seen through an items manager hook.
impl From<LibraryError> for ItemsError {
    fn from(e: LibraryError) -> Self {
        match e {
            LibraryError::Items(e) => e,
            LibraryError::Store(e) => e.into(),
            LibraryError::LibraryNotFound(id) => ItemsError::NotFound(id),
            LibraryError::Serialization(reason) => ItemsError::Serialization(reason),
            LibraryError::Config(reason) => ItemsError::BackingUnavailable(reason),
            LibraryError::Io(e) => ItemsError::BackingUnavailable(e.to_string()),
        }
    }
}

pub type LibraryResult<T> = Result<T, LibraryError>;
