//! Storage contract definition.

use crate::error::StorageResult;
use crate::etag::Etag;
use crate::types::{
    Attachment, AttachmentInformation, DocumentInTransaction, IndexStats, IndexTask, JsonDocument,
    JsonObject, TransactionRecord,
};
use uuid::Uuid;

/// Deferred work run after a batch has been committed.
pub type CommitAction = Box<dyn FnOnce() + Send>;

/// A transactional storage engine for CorvusDB.
///
/// Every database operation runs inside one batch obtained from
/// [`TransactionalStorage::begin_batch`]. A batch is atomic: either
/// [`StorageActions::commit`] makes all of its changes durable, or the
/// batch is dropped and none of them are visible.
///
/// # Invariants
///
/// - `id` is stable for the lifetime of the stored data
/// - Changes made through a batch are visible to that batch immediately
/// - Dropping an uncommitted batch discards its changes
/// - Identity sequences are never rolled back
/// - Commit actions run after the batch is durable, in registration order
///
/// # Implementors
///
/// - [`super::MemoryStorage`] - In-memory engine
pub trait TransactionalStorage: Send + Sync {
    /// Returns the durable id of this storage instance.
    fn id(&self) -> Uuid;

    /// Prepares the storage for use.
    ///
    /// Returns `true` if the storage was empty (a new database).
    ///
    /// # Errors
    ///
    /// Returns an error if the storage is disposed or cannot be opened.
    fn initialize(&self) -> StorageResult<bool>;

    /// Starts a new atomic batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage is not initialized or is disposed.
    fn begin_batch(&self) -> StorageResult<Box<dyn StorageActions + '_>>;

    /// Releases the storage. Further batches fail with `Disposed`.
    fn dispose(&self);

    /// Returns true once [`TransactionalStorage::dispose`] has been called.
    fn is_disposed(&self) -> bool;
}

/// An open storage batch exposing grouped accessors.
pub trait StorageActions {
    /// Document accessor.
    fn documents(&mut self) -> &mut dyn DocumentStorageActions;

    /// Attachment accessor.
    fn attachments(&mut self) -> &mut dyn AttachmentStorageActions;

    /// Pending transaction accessor.
    fn transactions(&mut self) -> &mut dyn TransactionStorageActions;

    /// Indexing task queue accessor.
    fn tasks(&mut self) -> &mut dyn TaskStorageActions;

    /// Index registry accessor.
    fn indexing(&mut self) -> &mut dyn IndexingStorageActions;

    /// Identity sequence accessor.
    fn general(&mut self) -> &mut dyn GeneralStorageActions;

    /// Registers work to run once this batch has been committed.
    ///
    /// Actions are discarded if the batch is dropped without committing.
    fn on_commit(&mut self, action: CommitAction);

    /// Commits every change made through this batch, then runs the
    /// registered commit actions.
    ///
    /// # Errors
    ///
    /// Returns an error if the changes cannot be made durable.
    fn commit(self: Box<Self>) -> StorageResult<()>;
}

/// Document storage operations.
pub trait DocumentStorageActions {
    /// Reads the committed document stored under `key`.
    fn document_by_key(&self, key: &str) -> StorageResult<Option<JsonDocument>>;

    /// Inserts or replaces a document.
    ///
    /// # Errors
    ///
    /// Returns `Concurrency` if `expected_etag` is given, a document exists,
    /// and its etag differs.
    fn add_document(
        &mut self,
        key: &str,
        expected_etag: Option<Etag>,
        new_etag: Etag,
        data: JsonObject,
        metadata: JsonObject,
    ) -> StorageResult<()>;

    /// Deletes a document, returning its metadata if it existed.
    ///
    /// # Errors
    ///
    /// Returns `Concurrency` if `expected_etag` is given and differs from
    /// the stored etag.
    fn delete_document(
        &mut self,
        key: &str,
        expected_etag: Option<Etag>,
    ) -> StorageResult<Option<JsonObject>>;

    /// Lists documents, most recently written first.
    fn documents_by_reverse_update_order(
        &self,
        start: usize,
        take: usize,
    ) -> StorageResult<Vec<JsonDocument>>;

    /// Lists documents written after `etag`, in etag order.
    fn documents_after(&self, etag: Etag, take: usize) -> StorageResult<Vec<JsonDocument>>;

    /// Returns the number of stored documents.
    fn documents_count(&self) -> StorageResult<u64>;

    /// Returns the etag of the most recently written document.
    fn last_document_etag(&self) -> StorageResult<Option<Etag>>;
}

/// Attachment storage operations.
pub trait AttachmentStorageActions {
    /// Reads the attachment stored under `key`.
    fn attachment(&self, key: &str) -> StorageResult<Option<Attachment>>;

    /// Inserts or replaces an attachment.
    ///
    /// # Errors
    ///
    /// Returns `Concurrency` on an etag mismatch against an existing attachment.
    fn add_attachment(
        &mut self,
        key: &str,
        expected_etag: Option<Etag>,
        new_etag: Etag,
        data: Vec<u8>,
        metadata: JsonObject,
    ) -> StorageResult<()>;

    /// Deletes an attachment, returning whether it existed.
    ///
    /// # Errors
    ///
    /// Returns `Concurrency` on an etag mismatch.
    fn delete_attachment(&mut self, key: &str, expected_etag: Option<Etag>) -> StorageResult<bool>;

    /// Lists attachment headers, most recently written first.
    fn attachments_by_reverse_update_order(
        &self,
        start: usize,
        take: usize,
    ) -> StorageResult<Vec<AttachmentInformation>>;

    /// Lists attachment headers written after `etag`, in etag order.
    fn attachments_after(
        &self,
        etag: Etag,
        take: usize,
    ) -> StorageResult<Vec<AttachmentInformation>>;

    /// Lists attachment headers whose key starts with `prefix`.
    fn attachments_with_prefix(&self, prefix: &str) -> StorageResult<Vec<AttachmentInformation>>;
}

/// Raw pending-transaction records.
///
/// A key is held by at most one pending write at a time.
pub trait TransactionStorageActions {
    /// Reads a pending transaction.
    fn transaction(&self, id: Uuid) -> StorageResult<Option<TransactionRecord>>;

    /// Inserts or replaces a pending transaction.
    fn put_transaction(&mut self, record: TransactionRecord) -> StorageResult<()>;

    /// Removes a pending transaction record, returning whether it existed.
    fn remove_transaction(&mut self, id: Uuid) -> StorageResult<bool>;

    /// Lists the ids of all pending transactions.
    fn transaction_ids(&self) -> StorageResult<Vec<Uuid>>;

    /// Reads the pending write holding `key`, if any.
    fn document_in_transaction(&self, key: &str) -> StorageResult<Option<DocumentInTransaction>>;

    /// Inserts or replaces the pending write for `write.key`.
    fn put_document_in_transaction(&mut self, write: DocumentInTransaction) -> StorageResult<()>;

    /// Removes the pending write holding `key`.
    fn remove_document_in_transaction(
        &mut self,
        key: &str,
    ) -> StorageResult<Option<DocumentInTransaction>>;

    /// Lists the pending writes of a transaction in the order they were made.
    fn documents_in_transaction(&self, id: Uuid) -> StorageResult<Vec<DocumentInTransaction>>;
}

/// Indexing task queue.
pub trait TaskStorageActions {
    /// Enqueues a task.
    fn add_task(&mut self, task: IndexTask) -> StorageResult<()>;

    /// Dequeues the oldest task, folding up to `max_merge` compatible
    /// queued tasks into it.
    fn dequeue_merged_task(&mut self, max_merge: usize) -> StorageResult<Option<IndexTask>>;

    /// Returns true if any task is queued.
    fn has_tasks(&self) -> StorageResult<bool>;

    /// Returns true if a task is queued for `index`.
    fn has_tasks_for(&self, index: &str) -> StorageResult<bool>;

    /// Returns the number of queued tasks.
    fn approximate_task_count(&self) -> StorageResult<u64>;
}

/// Registry of indexes and their progress.
///
/// Every registration gets a fresh generation. Writers that read stats in
/// one batch and act on them in another pass the generation back, so a
/// reset or delete in between surfaces as `Concurrency`.
pub trait IndexingStorageActions {
    /// Registers an index and returns its generation. Registering an
    /// existing index resets its progress.
    fn add_index(&mut self, name: &str) -> StorageResult<u64>;

    /// Removes an index and its queued tasks, returning whether it existed.
    ///
    /// # Errors
    ///
    /// Returns `Concurrency` if `expected_generation` is given and the
    /// index is missing or was registered again since.
    fn delete_index(&mut self, name: &str, expected_generation: Option<u64>)
        -> StorageResult<bool>;

    /// Reads the stats of one index.
    fn index_stats(&self, name: &str) -> StorageResult<Option<IndexStats>>;

    /// Lists every registered index.
    fn indexes(&self) -> StorageResult<Vec<IndexStats>>;

    /// Records an indexing pass of `generation`: progress up to
    /// `last_etag`, plus counters.
    ///
    /// # Errors
    ///
    /// Returns `Concurrency` if the index is missing or its generation no
    /// longer matches.
    fn record_indexing(
        &mut self,
        name: &str,
        generation: u64,
        last_etag: Etag,
        attempts: u64,
        errors: u64,
    ) -> StorageResult<()>;
}

/// General purpose durable state.
pub trait GeneralStorageActions {
    /// Returns the next value of the identity sequence named `name`,
    /// starting at 1. Values are never handed out twice, even if the
    /// batch that allocated them is discarded.
    fn next_identity_value(&mut self, name: &str) -> StorageResult<i64>;
}
