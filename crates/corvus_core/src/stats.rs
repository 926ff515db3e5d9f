//! Database statistics.

use crate::indexing::IndexFailureInformation;
use crate::trigger::TriggerDescription;
use crate::work::IndexingError;
use corvus_storage::Etag;

/// A point-in-time snapshot of database health.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseStatistics {
    /// Number of documents a load would find. System documents and
    /// conflict versions are loadable, so they are included.
    pub count_of_documents: u64,
    /// Etag of the most recently written document.
    pub last_document_etag: Option<Etag>,
    /// Number of queued indexing tasks.
    pub approximate_task_count: u64,
    /// Health of every registered index.
    pub indexes: Vec<IndexFailureInformation>,
    /// Indexes that have not caught up with the latest writes.
    pub stale_indexes: Vec<String>,
    /// Recent indexing failures, oldest first.
    pub errors: Vec<IndexingError>,
    /// Registered triggers.
    pub triggers: Vec<TriggerDescription>,
    /// Number of transactions with a recovery marker.
    pub pending_transactions: usize,
}

impl DatabaseStatistics {
    /// Returns true if any registered index has been disabled.
    #[must_use]
    pub fn has_disabled_indexes(&self) -> bool {
        self.indexes.iter().any(|index| index.is_invalid)
    }
}
