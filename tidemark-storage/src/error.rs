//! Storage error types.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in local store operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("record in {collection} has no primary key")]
    MissingKey { collection: &'static str },

    #[error("collection {collection} has no index on {field}")]
    UnknownIndex {
        collection: &'static str,
        field: String,
    },

    #[error("unsupported request method: {0}")]
    InvalidMethod(String),

    #[error("store connection lock poisoned")]
    Poisoned,

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
