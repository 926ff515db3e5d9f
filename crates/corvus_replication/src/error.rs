//! Error types for replication.

use corvus_core::CoreError;
use thiserror::Error;

/// Result type for replication operations.
pub type ReplicationResult<T> = Result<T, ReplicationError>;

/// Errors that can occur while receiving replicated items.
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// The remote source identifier is empty once normalized.
    #[error("invalid replication source: '{source_url}'")]
    InvalidSource {
        /// The identifier as given.
        source_url: String,
    },

    /// Database error while applying replicated items.
    #[error("database error: {0}")]
    Database(#[from] CoreError),
}

impl ReplicationError {
    /// Returns true if the underlying error is a concurrency failure.
    #[must_use]
    pub fn is_concurrency(&self) -> bool {
        matches!(self, Self::Database(err) if err.is_concurrency())
    }
}
