//! Database facade.

use crate::commands::{apply_patches, BatchResult, Command, PatchRequest, PatchResult};
use crate::config::Config;
use crate::context::OperationContext;
use crate::error::{CoreError, CoreResult};
use crate::etag::EtagGenerator;
use crate::indexing::{IndexFailureInformation, IndexingEngine, IndexingWorker};
use crate::stats::DatabaseStatistics;
use crate::transaction;
use crate::trigger::{
    apply_read_triggers, assert_delete_allowed, assert_put_allowed, is_readable,
    schedule_delete_commit, schedule_put_commit, ReadOperation, Triggers,
};
use crate::types::{remove_reserved_properties, PutResult, ETAG_IDENTITY, ID_METADATA};
use crate::work::WorkContext;
use corvus_storage::{
    Attachment, AttachmentInformation, Etag, IndexTask, JsonDocument, JsonObject, MemoryStorage,
    TransactionInformation, TransactionalStorage,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};
use tracing::{debug, info};
use uuid::Uuid;

const COUNT_PAGE_SIZE: usize = 1024;

/// The main database handle.
///
/// `Database` is the entry point for reading and writing documents and
/// attachments. It provides:
/// - Etag-checked puts and deletes
/// - Explicit transactions that span calls ([`TransactionInformation`])
/// - The trigger pipeline ([`Triggers`])
/// - Index registry and background indexing
///
/// Every operation runs inside one atomic storage batch. A `Database` is
/// `Send + Sync` and meant to be shared between threads.
///
/// # Example
///
/// ```rust
/// use corvus_core::Database;
/// use serde_json::json;
///
/// let db = Database::open_in_memory().unwrap();
/// let data = json!({"name": "ayende"}).as_object().cloned().unwrap();
/// let put = db.put("users/1", None, data, Default::default(), None).unwrap();
///
/// let doc = db.get("users/1", None).unwrap().unwrap();
/// assert_eq!(doc.etag, put.etag);
/// ```
pub struct Database {
    config: Config,
    storage: Arc<dyn TransactionalStorage>,
    triggers: Arc<Triggers>,
    etags: EtagGenerator,
    work: Arc<WorkContext>,
    worker: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl Database {
    /// Opens a database over `storage` with no triggers and default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be initialized.
    pub fn open(storage: Arc<dyn TransactionalStorage>) -> CoreResult<Self> {
        Self::open_with(storage, Config::default(), Triggers::empty())
    }

    /// Opens a fresh in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be initialized.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open(Arc::new(MemoryStorage::new()))
    }

    /// Opens a database with configuration and triggers.
    ///
    /// Initializes the storage, fixes the etag base of this process, runs
    /// every registered [`crate::trigger::DatabaseInitializer`] and logs
    /// transactions left pending by a previous run.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be initialized or an
    /// initializer fails. The storage is disposed in that case.
    pub fn open_with(
        storage: Arc<dyn TransactionalStorage>,
        config: Config,
        triggers: Triggers,
    ) -> CoreResult<Self> {
        match Self::initialize(Arc::clone(&storage), config, triggers) {
            Ok(db) => Ok(db),
            Err(err) => {
                storage.dispose();
                Err(err)
            }
        }
    }

    fn initialize(
        storage: Arc<dyn TransactionalStorage>,
        config: Config,
        triggers: Triggers,
    ) -> CoreResult<Self> {
        let is_new = storage.initialize()?;
        let etag_base = {
            let mut batch = storage.begin_batch()?;
            let base = batch.general().next_identity_value(ETAG_IDENTITY)?;
            batch.commit()?;
            base
        };

        let db = Self {
            work: Arc::new(WorkContext::new(config.max_retained_errors)),
            config,
            storage,
            triggers: Arc::new(triggers),
            etags: EtagGenerator::new(etag_base),
            worker: Mutex::new(None),
            disposed: AtomicBool::new(false),
        };

        let initializers = db.triggers.initializers.clone();
        db.execute(|ctx| {
            for initializer in &initializers {
                debug!(target: "corvus::db", initializer = initializer.name(), "Running initializer");
                initializer.initialize(ctx)?;
            }
            Ok(())
        })?;

        for tx in db.pending_transactions()? {
            info!(
                target: "corvus::txn",
                tx_id = %tx.id,
                timeout = ?tx.timeout,
                "Found transaction left pending by a previous run"
            );
        }

        info!(
            target: "corvus::db",
            storage_id = %db.storage.id(),
            is_new,
            triggers = db.triggers.len(),
            "Database opened"
        );
        Ok(db)
    }

    /// Runs `f` inside one storage batch and commits it.
    ///
    /// Everything done through the context, including nested operations
    /// issued by triggers, commits or rolls back together. If `f` fails
    /// the batch is discarded.
    ///
    /// # Errors
    ///
    /// Returns the error of `f`, or a storage error on commit.
    pub fn execute<T, F>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut OperationContext<'_>) -> CoreResult<T>,
    {
        self.ensure_open()?;
        let mut batch = self.storage.begin_batch()?;
        let (result, work_done) = {
            let mut ctx = OperationContext::new(self, batch.as_mut());
            let result = f(&mut ctx)?;
            (result, ctx.has_work())
        };
        batch.commit()?;
        if work_done {
            self.work.notify_about_work();
        }
        Ok(result)
    }

    // ========================================================================
    // Documents
    // ========================================================================

    /// Puts a document.
    ///
    /// An empty key is replaced by a random UUID; a key ending in `/` gets
    /// the next value of the identity sequence named by that key appended.
    /// `@`-prefixed properties are removed from `data` and `metadata`, and
    /// the final key is recorded in metadata as `@id`.
    ///
    /// With `tx`, the write is held pending until the transaction commits
    /// and triggers do not run.
    ///
    /// # Errors
    ///
    /// - `Vetoed` if a put veto refuses
    /// - `Concurrency` if `etag` is stale or the key is held by another transaction
    pub fn put(
        &self,
        key: &str,
        etag: Option<Etag>,
        data: JsonObject,
        metadata: JsonObject,
        tx: Option<&TransactionInformation>,
    ) -> CoreResult<PutResult> {
        self.execute(|ctx| self.put_document(ctx, key, etag, data, metadata, tx))
    }

    /// Deletes a document. Returns whether a document was removed.
    ///
    /// A document that loads as absent (for instance a tombstone left by
    /// replication) is not removed again; the call returns false and no
    /// delete triggers run.
    ///
    /// # Errors
    ///
    /// - `Vetoed` if a delete veto refuses
    /// - `Concurrency` if `etag` is stale or the key is held by another transaction
    pub fn delete(
        &self,
        key: &str,
        etag: Option<Etag>,
        tx: Option<&TransactionInformation>,
    ) -> CoreResult<bool> {
        self.execute(|ctx| self.delete_document(ctx, key, etag, tx))
    }

    /// Reads a document through the read triggers.
    ///
    /// Without `tx`, pending transactional writes are invisible; with `tx`,
    /// that transaction's pending writes are overlaid on committed state.
    ///
    /// # Errors
    ///
    /// Returns an error if a read trigger fails the read, such as a
    /// `Conflict` on a conflicted key.
    pub fn get(
        &self,
        key: &str,
        tx: Option<&TransactionInformation>,
    ) -> CoreResult<Option<JsonDocument>> {
        self.execute(|ctx| self.get_document(ctx, key, tx))
    }

    /// Applies field patches to a document.
    ///
    /// # Errors
    ///
    /// Returns `Concurrency` if `etag` is given and stale.
    pub fn apply_patch(
        &self,
        key: &str,
        etag: Option<Etag>,
        patches: &[PatchRequest],
        tx: Option<&TransactionInformation>,
    ) -> CoreResult<PatchResult> {
        self.execute(|ctx| self.patch_document(ctx, key, etag, patches, tx))
    }

    /// Executes heterogeneous commands in one storage batch.
    ///
    /// Returns one result per command, in order. If any command fails,
    /// none of them is applied.
    ///
    /// # Errors
    ///
    /// Returns the first failing command's error.
    pub fn batch(&self, commands: Vec<Command>) -> CoreResult<Vec<BatchResult>> {
        let count = commands.len();
        debug!(target: "corvus::db", commands = count, "Executing batched commands in a single transaction");
        let results = self.execute(|ctx| {
            commands
                .into_iter()
                .map(|command| self.execute_command(ctx, command))
                .collect::<CoreResult<Vec<_>>>()
        })?;
        debug!(target: "corvus::db", commands = count, "Successfully executed batched commands");
        Ok(results)
    }

    /// Lists documents through the read triggers.
    ///
    /// Without `after`, documents are listed most recently written first,
    /// skipping `start`. With `after`, documents written after that etag
    /// are listed in etag order. `page_size` is capped by
    /// [`Config::max_page_size`]. Hidden and conflicted documents are skipped.
    ///
    /// # Errors
    ///
    /// Returns a storage error, or a read trigger failure other than a conflict.
    pub fn get_documents(
        &self,
        start: usize,
        page_size: usize,
        after: Option<Etag>,
    ) -> CoreResult<Vec<JsonDocument>> {
        let take = page_size.min(self.config.max_page_size);
        self.execute(|ctx| {
            let documents = match after {
                Some(etag) => ctx.actions().documents().documents_after(etag, take)?,
                None => ctx
                    .actions()
                    .documents()
                    .documents_by_reverse_update_order(start, take)?,
            };
            let mut visible = Vec::with_capacity(documents.len());
            for doc in documents {
                let read = apply_read_triggers(
                    &self.triggers.documents,
                    &doc.key,
                    doc.data,
                    doc.metadata,
                    ReadOperation::Load,
                );
                match read {
                    Ok(Some((data, mut metadata))) => {
                        if !metadata.contains_key(ID_METADATA) {
                            metadata.insert(ID_METADATA.to_string(), Value::from(doc.key.clone()));
                        }
                        visible.push(JsonDocument {
                            data,
                            metadata,
                            ..doc
                        });
                    }
                    Ok(None) => {}
                    Err(CoreError::Conflict { key, .. }) => {
                        debug!(target: "corvus::db", key = %key, "Skipping conflicted document in listing");
                    }
                    Err(err) => return Err(err),
                }
            }
            Ok(visible)
        })
    }

    // ========================================================================
    // Attachments
    // ========================================================================

    /// Puts an attachment. Returns the new etag.
    ///
    /// # Errors
    ///
    /// - `Vetoed` if a put veto refuses
    /// - `Concurrency` if `etag` is stale
    pub fn put_static(
        &self,
        key: &str,
        etag: Option<Etag>,
        data: Vec<u8>,
        metadata: JsonObject,
    ) -> CoreResult<Etag> {
        self.execute(|ctx| self.put_attachment(ctx, key, etag, data, metadata))
    }

    /// Deletes an attachment. Returns whether an attachment was removed.
    /// As with [`Database::delete`], attachments that load as absent count
    /// as missing.
    ///
    /// # Errors
    ///
    /// - `Vetoed` if a delete veto refuses
    /// - `Concurrency` if `etag` is stale
    pub fn delete_static(&self, key: &str, etag: Option<Etag>) -> CoreResult<bool> {
        self.execute(|ctx| self.delete_attachment(ctx, key, etag))
    }

    /// Reads an attachment through the read triggers.
    ///
    /// # Errors
    ///
    /// Returns an error if a read trigger fails the read.
    pub fn get_static(&self, key: &str) -> CoreResult<Option<Attachment>> {
        self.execute(|ctx| self.get_attachment(ctx, key))
    }

    /// Lists attachment headers through the read triggers.
    ///
    /// Ordering and paging follow [`Database::get_documents`].
    ///
    /// # Errors
    ///
    /// Returns a storage error, or a read trigger failure other than a conflict.
    pub fn get_attachments(
        &self,
        start: usize,
        page_size: usize,
        after: Option<Etag>,
    ) -> CoreResult<Vec<AttachmentInformation>> {
        let take = page_size.min(self.config.max_page_size);
        self.execute(|ctx| {
            let headers = match after {
                Some(etag) => ctx.actions().attachments().attachments_after(etag, take)?,
                None => ctx
                    .actions()
                    .attachments()
                    .attachments_by_reverse_update_order(start, take)?,
            };
            let mut visible = Vec::with_capacity(headers.len());
            for header in headers {
                let Some(attachment) = ctx.actions().attachments().attachment(&header.key)? else {
                    continue;
                };
                let read = apply_read_triggers(
                    &self.triggers.attachments,
                    &attachment.key,
                    attachment.data,
                    attachment.metadata,
                    ReadOperation::Load,
                );
                match read {
                    Ok(Some((data, metadata))) => visible.push(AttachmentInformation {
                        key: attachment.key,
                        size: data.len(),
                        metadata,
                        etag: attachment.etag,
                    }),
                    Ok(None) => {}
                    Err(CoreError::Conflict { key, .. }) => {
                        debug!(target: "corvus::db", key = %key, "Skipping conflicted attachment in listing");
                    }
                    Err(err) => return Err(err),
                }
            }
            Ok(visible)
        })
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Commits a transaction by replaying its pending writes as ordinary
    /// puts and deletes, then removing its recovery marker, all in one batch.
    ///
    /// # Errors
    ///
    /// Returns the error of a replayed write; nothing is applied in that case.
    pub fn commit(&self, tx_id: Uuid) -> CoreResult<()> {
        self.execute(|ctx| {
            let writes = transaction::complete_transaction(ctx, tx_id)?;
            let count = writes.len();
            for write in writes {
                if write.delete {
                    self.delete_document(ctx, &write.key, None, None)?;
                } else {
                    self.put_document(ctx, &write.key, None, write.data, write.metadata, None)?;
                }
            }
            transaction::delete_recovery_marker(ctx, tx_id)?;
            ctx.mark_work();
            info!(target: "corvus::txn", tx_id = %tx_id, writes = count, "Transaction committed");
            Ok(())
        })
    }

    /// Discards a transaction's pending writes.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn rollback(&self, tx_id: Uuid) -> CoreResult<()> {
        self.execute(|ctx| {
            let existed = transaction::rollback_transaction(ctx, tx_id)?;
            ctx.mark_work();
            info!(target: "corvus::txn", tx_id = %tx_id, existed, "Transaction rolled back");
            Ok(())
        })
    }

    /// Moves the pending writes of `from` to the transaction `to`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if `from` is not pending.
    pub fn modify_transaction_id(&self, from: Uuid, to: &TransactionInformation) -> CoreResult<()> {
        self.execute(|ctx| transaction::modify_transaction_id(ctx, from, to, SystemTime::now()))
    }

    /// Lists transactions whose recovery markers are present.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn pending_transactions(&self) -> CoreResult<Vec<TransactionInformation>> {
        self.execute(|ctx| transaction::pending_transactions(ctx))
    }

    // ========================================================================
    // Indexes
    // ========================================================================

    /// Registers an index. Returns false if it was already registered.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn put_index(&self, name: &str) -> CoreResult<bool> {
        self.execute(|ctx| {
            if ctx.actions().indexing().index_stats(name)?.is_some() {
                return Ok(false);
            }
            ctx.actions().indexing().add_index(name)?;
            ctx.mark_work();
            Ok(true)
        })
    }

    /// Clears an index's progress so it is rebuilt from scratch.
    ///
    /// The index is read and re-registered in separate batches; if another
    /// writer resets or deletes it in between, the attempt is retried per
    /// [`Config::housekeeping_retries`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the index does not exist.
    pub fn reset_index(&self, name: &str) -> CoreResult<()> {
        self.with_housekeeping_retries(|| {
            let generation = self
                .index_generation(name)?
                .ok_or_else(|| no_such_index(name))?;
            self.execute(|ctx| {
                ctx.actions().indexing().delete_index(name, Some(generation))?;
                ctx.actions().indexing().add_index(name)?;
                ctx.mark_work();
                Ok(())
            })
        })
    }

    /// Removes an index. Returns whether it existed.
    ///
    /// Like [`Database::reset_index`], a concurrent reset between reading
    /// and removing the index is retried.
    ///
    /// # Errors
    ///
    /// Returns the last error once retries are exhausted.
    pub fn delete_index(&self, name: &str) -> CoreResult<bool> {
        self.with_housekeeping_retries(|| {
            let Some(generation) = self.index_generation(name)? else {
                return Ok(false);
            };
            self.execute(|ctx| {
                let existed = ctx
                    .actions()
                    .indexing()
                    .delete_index(name, Some(generation))?;
                ctx.mark_work();
                Ok(existed)
            })
        })
    }

    fn index_generation(&self, name: &str) -> CoreResult<Option<u64>> {
        self.execute(|ctx| {
            Ok(ctx
                .actions()
                .indexing()
                .index_stats(name)?
                .map(|stats| stats.generation))
        })
    }

    /// Lists registered index names.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn index_names(&self) -> CoreResult<Vec<String>> {
        self.execute(|ctx| {
            Ok(ctx
                .actions()
                .indexing()
                .indexes()?
                .into_iter()
                .map(|stats| stats.name)
                .collect())
        })
    }

    /// Returns true if the index has queued tasks or has not caught up
    /// with the latest document write.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the index does not exist.
    pub fn is_index_stale(&self, name: &str) -> CoreResult<bool> {
        self.execute(|ctx| {
            let stats = ctx
                .actions()
                .indexing()
                .index_stats(name)?
                .ok_or_else(|| no_such_index(name))?;
            if ctx.actions().tasks().has_tasks_for(name)? {
                return Ok(true);
            }
            let last = ctx.actions().documents().last_document_etag()?;
            Ok(last.is_some_and(|etag| etag > stats.last_indexed_etag))
        })
    }

    /// Returns the health of an index.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the index does not exist.
    pub fn index_failure_information(&self, name: &str) -> CoreResult<IndexFailureInformation> {
        self.execute(|ctx| {
            let stats = ctx
                .actions()
                .indexing()
                .index_stats(name)?
                .ok_or_else(|| no_such_index(name))?;
            Ok(IndexFailureInformation::from_stats(
                &stats,
                self.config.index_failure_threshold,
                self.config.index_min_attempts_before_disable,
            ))
        })
    }

    /// Fails if the index has been disabled.
    ///
    /// # Errors
    ///
    /// Returns `IndexDisabled` for a disabled index, `InvalidOperation` for
    /// an unknown one.
    pub fn ensure_index_usable(&self, name: &str) -> CoreResult<()> {
        let info = self.index_failure_information(name)?;
        if info.is_invalid {
            return Err(CoreError::IndexDisabled {
                index: info.name,
                attempts: info.attempts,
                errors: info.errors,
            });
        }
        Ok(())
    }

    /// Returns true if any indexing task is queued.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn has_tasks(&self) -> CoreResult<bool> {
        self.execute(|ctx| Ok(ctx.actions().tasks().has_tasks()?))
    }

    /// Returns the number of queued indexing tasks.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn approximate_task_count(&self) -> CoreResult<u64> {
        self.execute(|ctx| Ok(ctx.actions().tasks().approximate_task_count()?))
    }

    /// Starts the background indexing worker feeding `engine`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the worker is already running or the
    /// thread cannot be spawned.
    pub fn spin_background_workers(&self, engine: Arc<dyn IndexingEngine>) -> CoreResult<()> {
        self.ensure_open()?;
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(CoreError::invalid_operation(
                "background workers are already running",
            ));
        }
        self.work.start_work();
        let indexer = IndexingWorker {
            storage: Arc::clone(&self.storage),
            triggers: Arc::clone(&self.triggers),
            engine,
            work: Arc::clone(&self.work),
            batch_size: self.config.background_batch_size,
            wait_timeout: self.config.work_wait_timeout,
            failure_threshold: self.config.index_failure_threshold,
            min_attempts: self.config.index_min_attempts_before_disable,
        };
        let handle = thread::Builder::new()
            .name("corvus-indexing".to_string())
            .spawn(move || indexer.run())
            .map_err(|e| {
                self.work.stop_work();
                CoreError::invalid_operation(format!("failed to spawn background worker: {e}"))
            })?;
        *worker = Some(handle);
        Ok(())
    }

    /// Stops the background worker and waits for its in-flight pass.
    pub fn stop_background_workers(&self) {
        self.work.stop_work();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Returns a snapshot of database health.
    ///
    /// `count_of_documents` counts what a load would find, so items hidden
    /// by read triggers (such as tombstones) are left out.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn statistics(&self) -> CoreResult<DatabaseStatistics> {
        let pending_transactions = self.pending_transactions()?.len();
        self.execute(|ctx| {
            let count_of_documents = self.visible_document_count(ctx)?;
            let last_document_etag = ctx.actions().documents().last_document_etag()?;
            let approximate_task_count = ctx.actions().tasks().approximate_task_count()?;
            let mut indexes = Vec::new();
            let mut stale_indexes = Vec::new();
            for stats in ctx.actions().indexing().indexes()? {
                let has_tasks = ctx.actions().tasks().has_tasks_for(&stats.name)?;
                let behind =
                    last_document_etag.is_some_and(|etag| etag > stats.last_indexed_etag);
                if has_tasks || behind {
                    stale_indexes.push(stats.name.clone());
                }
                indexes.push(IndexFailureInformation::from_stats(
                    &stats,
                    self.config.index_failure_threshold,
                    self.config.index_min_attempts_before_disable,
                ));
            }
            Ok(DatabaseStatistics {
                count_of_documents,
                last_document_etag,
                approximate_task_count,
                indexes,
                stale_indexes,
                errors: self.work.errors(),
                triggers: self.triggers.describe(),
                pending_transactions,
            })
        })
    }

    /// Returns the durable id of the underlying storage.
    #[must_use]
    pub fn storage_id(&self) -> Uuid {
        self.storage.id()
    }

    /// Returns database configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the registered triggers.
    #[must_use]
    pub fn triggers(&self) -> &Triggers {
        &self.triggers
    }

    /// Returns the work context shared with the background worker.
    #[must_use]
    pub fn work_context(&self) -> &Arc<WorkContext> {
        &self.work
    }

    /// Returns a fresh etag.
    pub fn next_etag(&self) -> Etag {
        self.etags.next()
    }

    /// Stops background work and disposes the storage. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_background_workers();
        self.storage.dispose();
        info!(target: "corvus::db", storage_id = %self.storage.id(), "Database disposed");
    }

    /// Checks if the database has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.is_disposed() {
            Err(CoreError::DatabaseDisposed)
        } else {
            Ok(())
        }
    }

    fn visible_document_count(&self, ctx: &mut OperationContext<'_>) -> CoreResult<u64> {
        let triggers = &self.triggers.documents;
        if triggers.readers.is_empty() {
            return Ok(ctx.actions().documents().documents_count()?);
        }
        let mut count = 0;
        let mut after = Etag::ZERO;
        loop {
            let page = ctx
                .actions()
                .documents()
                .documents_after(after, COUNT_PAGE_SIZE)?;
            let Some(last) = page.last().map(|doc| doc.etag) else {
                return Ok(count);
            };
            for doc in &page {
                if is_readable(triggers, &doc.key, &doc.data, &doc.metadata)? {
                    count += 1;
                }
            }
            after = last;
        }
    }

    fn with_housekeeping_retries<T>(&self, f: impl FnMut() -> CoreResult<T>) -> CoreResult<T> {
        retry_on_concurrency(
            self.config.housekeeping_retries,
            self.config.housekeeping_backoff,
            f,
        )
    }

    // ========================================================================
    // Operations within a batch
    // ========================================================================

    pub(crate) fn put_document(
        &self,
        ctx: &mut OperationContext<'_>,
        key: &str,
        etag: Option<Etag>,
        mut data: JsonObject,
        mut metadata: JsonObject,
        tx: Option<&TransactionInformation>,
    ) -> CoreResult<PutResult> {
        let mut key = if key.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            key.to_string()
        };
        remove_reserved_properties(&mut data);
        remove_reserved_properties(&mut metadata);
        if key.ends_with('/') {
            let identity = ctx.actions().general().next_identity_value(&key)?;
            key.push_str(&identity.to_string());
        }
        metadata.insert(ID_METADATA.to_string(), Value::from(key.clone()));

        let now = SystemTime::now();
        let new_etag = self.etags.next();
        match tx {
            None => {
                let triggers = &self.triggers.documents;
                transaction::assert_not_locked(ctx, &key, None, now)?;
                assert_put_allowed(ctx, triggers, &key, &data, &metadata, None)?;
                for trigger in &triggers.put_mutators {
                    trigger.on_put(ctx, &key, &mut data, &mut metadata, None)?;
                }
                ctx.actions().documents().add_document(
                    &key,
                    etag,
                    new_etag,
                    data.clone(),
                    metadata.clone(),
                )?;
                for trigger in &triggers.put_notifiers {
                    trigger.after_put(ctx, &key, &data, &metadata, new_etag, None)?;
                }
                schedule_put_commit(ctx, triggers, &key, &data, &metadata, new_etag);
            }
            Some(tx) => {
                transaction::add_document_in_transaction(
                    ctx, &key, etag, new_etag, data, metadata, tx, now,
                )?;
            }
        }
        ctx.mark_work();
        Ok(PutResult {
            key,
            etag: new_etag,
        })
    }

    pub(crate) fn delete_document(
        &self,
        ctx: &mut OperationContext<'_>,
        key: &str,
        etag: Option<Etag>,
        tx: Option<&TransactionInformation>,
    ) -> CoreResult<bool> {
        let now = SystemTime::now();
        let deleted = match tx {
            None => {
                let triggers = &self.triggers.documents;
                transaction::assert_not_locked(ctx, key, None, now)?;
                assert_delete_allowed(ctx, triggers, key, None)?;
                // Writes applied for replication act on what is stored.
                if !ctx.is_replicating() {
                    if let Some(doc) = ctx.actions().documents().document_by_key(key)? {
                        if !is_readable(triggers, key, &doc.data, &doc.metadata)? {
                            return Ok(false);
                        }
                    }
                }
                for trigger in &triggers.delete_mutators {
                    trigger.on_delete(ctx, key, None)?;
                }
                let deleted = ctx.actions().documents().delete_document(key, etag)?.is_some();
                if deleted {
                    for index in ctx.actions().indexing().indexes()? {
                        ctx.actions()
                            .tasks()
                            .add_task(IndexTask::remove_from_index(index.name, vec![key.to_string()]))?;
                    }
                    for trigger in &triggers.delete_notifiers {
                        trigger.after_delete(ctx, key, None)?;
                    }
                    schedule_delete_commit(ctx, triggers, key);
                }
                deleted
            }
            Some(tx) => {
                let readable = match transaction::document_by_key(ctx, key, Some(tx), now)? {
                    Some(doc) => is_readable(&self.triggers.documents, key, &doc.data, &doc.metadata)?,
                    None => false,
                };
                let new_etag = self.etags.next();
                let existed =
                    transaction::delete_document_in_transaction(ctx, key, etag, new_etag, tx, now)?;
                existed && readable
            }
        };
        ctx.mark_work();
        Ok(deleted)
    }

    pub(crate) fn get_document(
        &self,
        ctx: &mut OperationContext<'_>,
        key: &str,
        tx: Option<&TransactionInformation>,
    ) -> CoreResult<Option<JsonDocument>> {
        let Some(doc) = transaction::document_by_key(ctx, key, tx, SystemTime::now())? else {
            return Ok(None);
        };
        let read = apply_read_triggers(
            &self.triggers.documents,
            &doc.key,
            doc.data,
            doc.metadata,
            ReadOperation::Load,
        )?;
        Ok(read.map(|(data, metadata)| JsonDocument {
            data,
            metadata,
            ..doc
        }))
    }

    pub(crate) fn patch_document(
        &self,
        ctx: &mut OperationContext<'_>,
        key: &str,
        etag: Option<Etag>,
        patches: &[PatchRequest],
        tx: Option<&TransactionInformation>,
    ) -> CoreResult<PatchResult> {
        let Some(doc) = transaction::document_by_key(ctx, key, tx, SystemTime::now())? else {
            return Ok(PatchResult::DocumentDoesNotExist);
        };
        if let Some(expected) = etag {
            if doc.etag != expected {
                return Err(CoreError::etag_mismatch(
                    format!("Could not patch document '{key}' because non current etag was used"),
                    expected,
                    doc.etag,
                ));
            }
        }
        let mut data = doc.data;
        apply_patches(&mut data, patches)?;
        let put = self.put_document(ctx, &doc.key, Some(doc.etag), data, doc.metadata, tx)?;
        Ok(PatchResult::Patched { etag: put.etag })
    }

    pub(crate) fn put_attachment(
        &self,
        ctx: &mut OperationContext<'_>,
        key: &str,
        etag: Option<Etag>,
        mut data: Vec<u8>,
        mut metadata: JsonObject,
    ) -> CoreResult<Etag> {
        let triggers = &self.triggers.attachments;
        remove_reserved_properties(&mut metadata);
        assert_put_allowed(ctx, triggers, key, &data, &metadata, None)?;
        for trigger in &triggers.put_mutators {
            trigger.on_put(ctx, key, &mut data, &mut metadata, None)?;
        }
        let new_etag = self.etags.next();
        ctx.actions().attachments().add_attachment(
            key,
            etag,
            new_etag,
            data.clone(),
            metadata.clone(),
        )?;
        for trigger in &triggers.put_notifiers {
            trigger.after_put(ctx, key, &data, &metadata, new_etag, None)?;
        }
        schedule_put_commit(ctx, triggers, key, &data, &metadata, new_etag);
        ctx.mark_work();
        Ok(new_etag)
    }

    pub(crate) fn delete_attachment(
        &self,
        ctx: &mut OperationContext<'_>,
        key: &str,
        etag: Option<Etag>,
    ) -> CoreResult<bool> {
        let triggers = &self.triggers.attachments;
        assert_delete_allowed(ctx, triggers, key, None)?;
        if !ctx.is_replicating() {
            if let Some(attachment) = ctx.actions().attachments().attachment(key)? {
                if !is_readable(triggers, key, &attachment.data, &attachment.metadata)? {
                    return Ok(false);
                }
            }
        }
        for trigger in &triggers.delete_mutators {
            trigger.on_delete(ctx, key, None)?;
        }
        let deleted = ctx.actions().attachments().delete_attachment(key, etag)?;
        if deleted {
            for trigger in &triggers.delete_notifiers {
                trigger.after_delete(ctx, key, None)?;
            }
            schedule_delete_commit(ctx, triggers, key);
        }
        ctx.mark_work();
        Ok(deleted)
    }

    pub(crate) fn get_attachment(
        &self,
        ctx: &mut OperationContext<'_>,
        key: &str,
    ) -> CoreResult<Option<Attachment>> {
        let Some(attachment) = ctx.actions().attachments().attachment(key)? else {
            return Ok(None);
        };
        let read = apply_read_triggers(
            &self.triggers.attachments,
            &attachment.key,
            attachment.data,
            attachment.metadata,
            ReadOperation::Load,
        )?;
        Ok(read.map(|(data, metadata)| Attachment {
            data,
            metadata,
            ..attachment
        }))
    }

    fn execute_command(
        &self,
        ctx: &mut OperationContext<'_>,
        command: Command,
    ) -> CoreResult<BatchResult> {
        let method = command.method();
        match command {
            Command::Put {
                key,
                etag,
                document,
                metadata,
                transaction,
            } => {
                let put = self.put_document(ctx, &key, etag, document, metadata, transaction.as_ref())?;
                let stored = transaction::document_by_key(
                    ctx,
                    &put.key,
                    transaction.as_ref(),
                    SystemTime::now(),
                )?
                .map(|doc| doc.metadata);
                Ok(BatchResult {
                    method,
                    key: put.key,
                    etag: Some(put.etag),
                    metadata: stored,
                    patch_result: None,
                    deleted: None,
                })
            }
            Command::Delete {
                key,
                etag,
                transaction,
            } => {
                let deleted = self.delete_document(ctx, &key, etag, transaction.as_ref())?;
                Ok(BatchResult {
                    method,
                    key,
                    etag: None,
                    metadata: None,
                    patch_result: None,
                    deleted: Some(deleted),
                })
            }
            Command::Patch {
                key,
                etag,
                patches,
                transaction,
            } => {
                let result = self.patch_document(ctx, &key, etag, &patches, transaction.as_ref())?;
                let etag = match result {
                    PatchResult::Patched { etag } => Some(etag),
                    PatchResult::DocumentDoesNotExist => None,
                };
                Ok(BatchResult {
                    method,
                    key,
                    etag,
                    metadata: None,
                    patch_result: Some(result),
                    deleted: None,
                })
            }
        }
    }
}

fn no_such_index(name: &str) -> CoreError {
    CoreError::invalid_operation(format!("there is no index named: {name}"))
}

/// Runs `f` up to `attempts` times while it fails with a concurrency error.
pub(crate) fn retry_on_concurrency<T>(
    attempts: u32,
    backoff: Duration,
    mut f: impl FnMut() -> CoreResult<T>,
) -> CoreResult<T> {
    let mut attempt = 1;
    loop {
        match f() {
            Err(err) if err.is_concurrency() && attempt < attempts => {
                debug!(target: "corvus::db", attempt, error = %err, "Retrying after concurrency failure");
                thread::sleep(backoff);
                attempt += 1;
            }
            other => return other,
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("storage_id", &self.storage.id())
            .field("etag_base", &self.etags.base())
            .field("triggers", &self.triggers)
            .field("is_disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.dispose();
    }
}
