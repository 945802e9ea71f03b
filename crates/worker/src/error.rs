//! Worker error types.

use std::sync::Arc;
use thiserror::Error;

/// Errors raised by the caching worker.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] larder_core::Error),

    #[error(transparent)]
    Storage(#[from] larder_storage::StorageError),

    /// A table read for a key with no entry. Callers that treat absence as a
    /// normal condition match on this variant.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("network error for {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("unexpected {status} response for {url}")]
    UnexpectedStatus { url: String, status: u16 },

    #[error("invalid driver state: {0}")]
    State(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An error surfaced through a deduplicated in-flight fetch; every caller
    /// that joined the fetch observes the same underlying failure.
    #[error("{0}")]
    Shared(Arc<Error>),
}

impl Error {
    /// Whether this is the tagged read-miss error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

/// Result type alias for worker operations.
pub type Result<T> = std::result::Result<T, Error>;
