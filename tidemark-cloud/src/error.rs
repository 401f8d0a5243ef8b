//! Sync engine error types.

use thiserror::Error;
use tidemark_storage::StorageError;

/// Result type for sync operations.
pub type CloudResult<T> = Result<T, CloudError>;

/// Errors that can occur while talking to the server or reconciling.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("API rejected request ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("API request failed: {0}")]
    Api(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CloudError {
    /// True when the request never got an answer from the server.
    ///
    /// Only these failures take the optimistic-write-and-enqueue path; a
    /// server that answered and said no is surfaced to the caller.
    pub fn is_network(&self) -> bool {
        match self {
            CloudError::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            _ => false,
        }
    }
}
