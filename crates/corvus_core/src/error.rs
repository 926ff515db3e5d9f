//! Error types for CorvusDB core.

use crate::types::EntityKind;
use corvus_storage::{Etag, StorageError};
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in CorvusDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A trigger refused the operation.
    #[error("{operation} vetoed by {trigger} because: {reason}")]
    Vetoed {
        /// `PUT` or `DELETE`.
        operation: &'static str,
        /// Identity of the refusing trigger.
        trigger: String,
        /// Reason given by the trigger.
        reason: String,
    },

    /// An etag check failed, or the key is held by another transaction.
    #[error("{message}")]
    Concurrency {
        /// Description of the collision.
        message: String,
        /// The etag the caller expected, if any.
        expected: Option<Etag>,
        /// The etag found, if any.
        actual: Option<Etag>,
    },

    /// The item is in conflict and must be resolved before it can be read.
    #[error("Conflict detected on {key}, conflict must be resolved before the {kind} will be accessible")]
    Conflict {
        /// Conflicted key.
        key: String,
        /// Whether the key names a document or an attachment.
        kind: EntityKind,
        /// Ids of the competing versions.
        conflicted_version_ids: Vec<String>,
    },

    /// The index failed too often and has been disabled.
    #[error("index '{index}' is disabled: {errors} failures out of {attempts} attempts")]
    IndexDisabled {
        /// Index name.
        index: String,
        /// Documents the index attempted.
        attempts: u64,
        /// Documents that failed.
        errors: u64,
    },

    /// Storage engine error.
    #[error("storage error: {0}")]
    Storage(StorageError),

    /// A value could not be serialized or deserialized.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the failure.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// The database has been disposed.
    #[error("database is disposed")]
    DatabaseDisposed,
}

impl CoreError {
    /// Creates a veto error.
    pub fn vetoed(
        operation: &'static str,
        trigger: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Vetoed {
            operation,
            trigger: trigger.into(),
            reason: reason.into(),
        }
    }

    /// Creates a concurrency error without etag details.
    pub fn concurrency(message: impl Into<String>) -> Self {
        Self::Concurrency {
            message: message.into(),
            expected: None,
            actual: None,
        }
    }

    /// Creates a concurrency error for an etag mismatch.
    pub fn etag_mismatch(message: impl Into<String>, expected: Etag, actual: Etag) -> Self {
        Self::Concurrency {
            message: message.into(),
            expected: Some(expected),
            actual: Some(actual),
        }
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for [`CoreError::Concurrency`].
    #[must_use]
    pub fn is_concurrency(&self) -> bool {
        matches!(self, Self::Concurrency { .. })
    }
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Concurrency {
                message,
                expected,
                actual,
            } => Self::Concurrency {
                message,
                expected,
                actual,
            },
            StorageError::Disposed => Self::DatabaseDisposed,
            other => Self::Storage(other),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}
