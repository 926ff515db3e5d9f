//! Collaboration with the external indexing engine.
//!
//! The database does not build indexes itself. It keeps a registry of
//! index names with their progress, queues removal tasks when documents
//! are deleted, and runs a background worker that feeds new documents and
//! queued tasks to an [`IndexingEngine`].

use crate::error::{CoreError, CoreResult};
use crate::trigger::{apply_read_triggers, ReadOperation, Triggers};
use crate::work::{IndexingError, WorkContext};
use corvus_storage::{IndexStats, JsonDocument, TaskAction, TransactionalStorage};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};

/// Compatible queued tasks folded into one engine call.
const MAX_TASK_MERGE: usize = 1024;

/// A failure reported by an [`IndexingEngine`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexingFailure {
    /// Document key, if the failure concerns one document.
    pub key: Option<String>,
    /// Engine message.
    pub message: String,
}

impl IndexingFailure {
    /// Creates a failure for one document.
    pub fn for_key(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            message: message.into(),
        }
    }
}

/// The external engine that maintains index contents.
pub trait IndexingEngine: Send + Sync {
    /// Indexes a batch of documents, returning the failures.
    fn index_documents(&self, index: &str, documents: &[JsonDocument]) -> Vec<IndexingFailure>;

    /// Removes document keys from an index, returning the failures.
    fn remove_from_index(&self, index: &str, keys: &[String]) -> Vec<IndexingFailure>;
}

/// Health of one index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexFailureInformation {
    /// Index name.
    pub name: String,
    /// Documents the index attempted.
    pub attempts: u64,
    /// Documents that failed.
    pub errors: u64,
    /// Whether the index has been disabled.
    pub is_invalid: bool,
}

impl IndexFailureInformation {
    pub(crate) fn from_stats(stats: &IndexStats, threshold: f64, min_attempts: u64) -> Self {
        Self {
            name: stats.name.clone(),
            attempts: stats.attempts,
            errors: stats.errors,
            is_invalid: is_invalid(stats, threshold, min_attempts),
        }
    }

    /// Fraction of attempts that failed.
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.errors as f64 / self.attempts as f64
        }
    }
}

/// An index is disabled once it has enough attempts and too many failures.
pub(crate) fn is_invalid(stats: &IndexStats, threshold: f64, min_attempts: u64) -> bool {
    stats.attempts >= min_attempts
        && stats.attempts > 0
        && (stats.errors as f64 / stats.attempts as f64) > threshold
}

/// The background indexing loop.
pub(crate) struct IndexingWorker {
    pub(crate) storage: Arc<dyn TransactionalStorage>,
    pub(crate) triggers: Arc<Triggers>,
    pub(crate) engine: Arc<dyn IndexingEngine>,
    pub(crate) work: Arc<WorkContext>,
    pub(crate) batch_size: usize,
    pub(crate) wait_timeout: Duration,
    pub(crate) failure_threshold: f64,
    pub(crate) min_attempts: u64,
}

impl IndexingWorker {
    /// Runs until the work context stops.
    pub(crate) fn run(&self) {
        info!(target: "corvus::indexing", "Background indexing started");
        while self.work.is_running() {
            match self.execute_pass() {
                Ok(true) => {}
                Ok(false) => {
                    self.work.wait_for_work(self.wait_timeout);
                }
                Err(CoreError::DatabaseDisposed) => break,
                Err(err) => {
                    error!(target: "corvus::indexing", error = %err, "Indexing pass failed");
                    self.work.wait_for_work(self.wait_timeout);
                }
            }
        }
        info!(target: "corvus::indexing", "Background indexing stopped");
    }

    /// Runs one task and one indexing round. Returns true if anything was done.
    pub(crate) fn execute_pass(&self) -> CoreResult<bool> {
        let ran_task = self.execute_task()?;
        let indexed = self.index_documents()?;
        Ok(ran_task || indexed)
    }

    fn execute_task(&self) -> CoreResult<bool> {
        let task = {
            let mut batch = self.storage.begin_batch()?;
            let task = batch.tasks().dequeue_merged_task(MAX_TASK_MERGE)?;
            batch.commit()?;
            task
        };
        let Some(task) = task else {
            return Ok(false);
        };
        match &task.action {
            TaskAction::RemoveFromIndex { keys } => {
                debug!(
                    target: "corvus::indexing",
                    index = %task.index,
                    keys = keys.len(),
                    "Removing documents from index"
                );
                let failures = self.engine.remove_from_index(&task.index, keys);
                self.record_failures(&task.index, failures);
            }
        }
        Ok(true)
    }

    fn index_documents(&self) -> CoreResult<bool> {
        let pending: Vec<(String, u64, Vec<JsonDocument>)> = {
            let mut batch = self.storage.begin_batch()?;
            let mut pending = Vec::new();
            for stats in batch.indexing().indexes()? {
                if is_invalid(&stats, self.failure_threshold, self.min_attempts) {
                    continue;
                }
                let documents = batch
                    .documents()
                    .documents_after(stats.last_indexed_etag, self.batch_size)?;
                if !documents.is_empty() {
                    pending.push((stats.name, stats.generation, documents));
                }
            }
            pending
        };

        let did_work = !pending.is_empty();
        for (index, generation, documents) in pending {
            let Some(last_etag) = documents.last().map(|doc| doc.etag) else {
                continue;
            };
            let visible = self.visible_documents(documents);
            let failures = if visible.is_empty() {
                Vec::new()
            } else {
                self.engine.index_documents(&index, &visible)
            };
            let errors = failures.len() as u64;
            self.record_failures(&index, failures);

            let mut batch = self.storage.begin_batch()?;
            let recorded = batch.indexing().record_indexing(
                &index,
                generation,
                last_etag,
                visible.len() as u64,
                errors,
            );
            match recorded {
                Ok(()) => batch.commit()?,
                Err(err) if err.is_concurrency() => {
                    debug!(
                        target: "corvus::indexing",
                        index = %index,
                        error = %err,
                        "Index changed during pass, discarding progress"
                    );
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
            debug!(
                target: "corvus::indexing",
                index = %index,
                documents = visible.len(),
                errors,
                "Indexed documents"
            );
        }
        Ok(did_work)
    }

    fn visible_documents(&self, documents: Vec<JsonDocument>) -> Vec<JsonDocument> {
        let mut visible = Vec::with_capacity(documents.len());
        for doc in documents {
            match apply_read_triggers(
                &self.triggers.documents,
                &doc.key,
                doc.data,
                doc.metadata,
                ReadOperation::Index,
            ) {
                Ok(Some((data, metadata))) => visible.push(JsonDocument {
                    data,
                    metadata,
                    ..doc
                }),
                Ok(None) => {}
                Err(err) => warn!(
                    target: "corvus::indexing",
                    key = %doc.key,
                    error = %err,
                    "Skipping unreadable document"
                ),
            }
        }
        visible
    }

    fn record_failures(&self, index: &str, failures: Vec<IndexingFailure>) {
        for failure in failures {
            warn!(
                target: "corvus::indexing",
                index,
                key = ?failure.key,
                message = %failure.message,
                "Indexing failure"
            );
            self.work.add_error(IndexingError {
                index: index.to_string(),
                key: failure.key,
                message: failure.message,
                timestamp: SystemTime::now(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(attempts: u64, errors: u64) -> IndexStats {
        let mut stats = IndexStats::new("ByName", 1);
        stats.attempts = attempts;
        stats.errors = errors;
        stats
    }

    #[test]
    fn index_with_few_attempts_stays_valid() {
        assert!(!is_invalid(&stats(99, 99), 0.15, 100));
    }

    #[test]
    fn index_above_threshold_is_invalid() {
        assert!(is_invalid(&stats(100, 16), 0.15, 100));
        assert!(!is_invalid(&stats(100, 15), 0.15, 100));
    }

    #[test]
    fn failure_rate() {
        let info = IndexFailureInformation::from_stats(&stats(200, 50), 0.15, 100);
        assert!((info.failure_rate() - 0.25).abs() < f64::EPSILON);
        assert!(info.is_invalid);
        let empty = IndexFailureInformation::from_stats(&stats(0, 0), 0.15, 100);
        assert_eq!(empty.failure_rate(), 0.0);
    }
}
