//! Data model shared between the storage contract and the database core.

use crate::etag::Etag;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// A JSON object: the representation of document bodies and metadata.
pub type JsonObject = serde_json::Map<String, serde_json::Value>;

/// A stored document.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonDocument {
    /// Unique key.
    pub key: String,
    /// Document body.
    pub data: JsonObject,
    /// Document metadata.
    pub metadata: JsonObject,
    /// Current etag.
    pub etag: Etag,
    /// Wall-clock time of the last write.
    pub last_modified: SystemTime,
}

/// A stored attachment.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    /// Unique key.
    pub key: String,
    /// Raw content.
    pub data: Vec<u8>,
    /// Attachment metadata.
    pub metadata: JsonObject,
    /// Current etag.
    pub etag: Etag,
}

/// Attachment header returned by listings (content omitted).
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentInformation {
    /// Unique key.
    pub key: String,
    /// Content length in bytes.
    pub size: usize,
    /// Attachment metadata.
    pub metadata: JsonObject,
    /// Current etag.
    pub etag: Etag,
}

impl From<&Attachment> for AttachmentInformation {
    fn from(attachment: &Attachment) -> Self {
        Self {
            key: attachment.key.clone(),
            size: attachment.data.len(),
            metadata: attachment.metadata.clone(),
            etag: attachment.etag,
        }
    }
}

/// Identifies an explicit, cross-call transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionInformation {
    /// Transaction id.
    pub id: Uuid,
    /// How long the transaction may stay pending after its last write.
    pub timeout: Duration,
}

impl TransactionInformation {
    /// Creates transaction information with a fresh id.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            timeout,
        }
    }

    /// Returns the deadline for a write made at `now`.
    #[must_use]
    pub fn expires_at(&self, now: SystemTime) -> SystemTime {
        now.checked_add(self.timeout).unwrap_or(now)
    }
}

/// A pending transaction as recorded by storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionRecord {
    /// Transaction id.
    pub id: Uuid,
    /// Point in time after which the transaction may be superseded.
    pub expires_at: SystemTime,
}

impl TransactionRecord {
    /// Returns true if the transaction has expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: SystemTime) -> bool {
        now >= self.expires_at
    }
}

/// A document write held pending by a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentInTransaction {
    /// Key of the written document.
    pub key: String,
    /// Owning transaction.
    pub tx_id: Uuid,
    /// Pending body (empty for deletes).
    pub data: JsonObject,
    /// Pending metadata (empty for deletes).
    pub metadata: JsonObject,
    /// Etag assigned to the pending version.
    pub etag: Etag,
    /// Whether the pending write is a delete.
    pub delete: bool,
}

/// Work item queued for the indexing engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexTask {
    /// Target index.
    pub index: String,
    /// What to do.
    pub action: TaskAction,
}

/// Kinds of queued indexing work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskAction {
    /// Remove the given document keys from the index.
    RemoveFromIndex {
        /// Keys to remove.
        keys: Vec<String>,
    },
}

impl IndexTask {
    /// Creates a removal task.
    pub fn remove_from_index(index: impl Into<String>, keys: Vec<String>) -> Self {
        Self {
            index: index.into(),
            action: TaskAction::RemoveFromIndex { keys },
        }
    }

    /// Returns true if `other` can be folded into this task.
    #[must_use]
    pub fn can_merge(&self, other: &IndexTask) -> bool {
        self.index == other.index
            && matches!(
                (&self.action, &other.action),
                (TaskAction::RemoveFromIndex { .. }, TaskAction::RemoveFromIndex { .. })
            )
    }

    /// Folds `other` into this task. Callers check [`IndexTask::can_merge`] first.
    pub fn merge(&mut self, other: IndexTask) {
        match (&mut self.action, other.action) {
            (TaskAction::RemoveFromIndex { keys }, TaskAction::RemoveFromIndex { keys: more }) => {
                for key in more {
                    if !keys.contains(&key) {
                        keys.push(key);
                    }
                }
            }
        }
    }
}

/// Bookkeeping for one registered index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexStats {
    /// Index name.
    pub name: String,
    /// Changes every time the index is registered again.
    pub generation: u64,
    /// Number of documents the engine was asked to index.
    pub attempts: u64,
    /// Number of those that failed.
    pub errors: u64,
    /// Etag of the last document handed to the engine.
    pub last_indexed_etag: Etag,
    /// When the index last made progress.
    pub last_indexed_at: Option<SystemTime>,
}

impl IndexStats {
    /// Creates stats for a freshly registered index.
    pub fn new(name: impl Into<String>, generation: u64) -> Self {
        Self {
            name: name.into(),
            generation,
            attempts: 0,
            errors: 0,
            last_indexed_etag: Etag::ZERO,
            last_indexed_at: None,
        }
    }
}
