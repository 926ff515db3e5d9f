//! Error types for storage operations.

use crate::etag::Etag;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An etag check failed or a key is held by another writer.
    #[error("{message}")]
    Concurrency {
        /// Human readable description of the collision.
        message: String,
        /// The etag the caller expected, if any.
        expected: Option<Etag>,
        /// The etag currently stored, if any.
        actual: Option<Etag>,
    },

    /// The storage was used before `initialize` was called.
    #[error("storage is not initialized")]
    NotInitialized,

    /// The storage has been disposed.
    #[error("storage is disposed")]
    Disposed,

    /// Stored data is inconsistent.
    #[error("storage corrupted: {0}")]
    Corrupted(String),
}

impl StorageError {
    /// Creates a concurrency error for an etag mismatch on `key`.
    pub fn etag_mismatch(
        operation: &str,
        key: &str,
        expected: Option<Etag>,
        actual: Option<Etag>,
    ) -> Self {
        Self::Concurrency {
            message: format!(
                "{operation} attempted on '{key}' using a non current etag"
            ),
            expected,
            actual,
        }
    }

    /// Creates a concurrency error for an index registered again (or
    /// removed) since `expected` was read.
    pub fn index_generation_mismatch(name: &str, expected: u64, actual: Option<u64>) -> Self {
        let found = match actual {
            Some(actual) => format!("generation {actual}"),
            None => "no such index".to_string(),
        };
        Self::Concurrency {
            message: format!(
                "Index '{name}' changed: expected generation {expected}, found {found}"
            ),
            expected: None,
            actual: None,
        }
    }

    /// Returns true if this is a concurrency error.
    #[must_use]
    pub fn is_concurrency(&self) -> bool {
        matches!(self, Self::Concurrency { .. })
    }
}
