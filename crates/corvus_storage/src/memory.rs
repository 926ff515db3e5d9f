//! In-memory storage engine.

use crate::backend::{
    AttachmentStorageActions, CommitAction, DocumentStorageActions, GeneralStorageActions,
    IndexingStorageActions, StorageActions, TaskStorageActions, TransactionStorageActions,
    TransactionalStorage,
};
use crate::error::{StorageError, StorageResult};
use crate::etag::Etag;
use crate::types::{
    Attachment, AttachmentInformation, DocumentInTransaction, IndexStats, IndexTask, JsonDocument,
    JsonObject, TransactionRecord,
};
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::SystemTime;
use uuid::Uuid;

type Undo = Box<dyn FnOnce(&mut Tables)>;

trait Versioned {
    fn etag(&self) -> Etag;
}

impl Versioned for JsonDocument {
    fn etag(&self) -> Etag {
        self.etag
    }
}

impl Versioned for Attachment {
    fn etag(&self) -> Etag {
        self.etag
    }
}

/// Replaces the item under `key`, keeping the etag index in step.
fn swap_versioned<T: Versioned>(
    items: &mut BTreeMap<String, T>,
    by_etag: &mut BTreeMap<Etag, String>,
    key: &str,
    next: Option<T>,
) -> Option<T> {
    let previous = items.remove(key);
    if let Some(previous) = &previous {
        by_etag.remove(&previous.etag());
    }
    if let Some(next) = next {
        by_etag.insert(next.etag(), key.to_string());
        items.insert(key.to_string(), next);
    }
    previous
}

#[derive(Debug, Default)]
struct Tables {
    documents: BTreeMap<String, JsonDocument>,
    documents_by_etag: BTreeMap<Etag, String>,
    attachments: BTreeMap<String, Attachment>,
    attachments_by_etag: BTreeMap<Etag, String>,
    transactions: HashMap<Uuid, TransactionRecord>,
    documents_in_tx: HashMap<String, (u64, DocumentInTransaction)>,
    tx_write_seq: u64,
    tasks: VecDeque<IndexTask>,
    indexes: BTreeMap<String, IndexStats>,
}

impl Tables {
    fn swap_document(&mut self, key: &str, next: Option<JsonDocument>) -> Option<JsonDocument> {
        swap_versioned(&mut self.documents, &mut self.documents_by_etag, key, next)
    }

    fn swap_attachment(&mut self, key: &str, next: Option<Attachment>) -> Option<Attachment> {
        swap_versioned(&mut self.attachments, &mut self.attachments_by_etag, key, next)
    }

    fn is_empty(&self) -> bool {
        self.documents.is_empty() && self.attachments.is_empty()
    }
}

/// An in-memory storage engine.
///
/// This engine keeps all data in memory and is suitable for:
/// - Unit and integration tests
/// - Embedded databases that don't need persistence
///
/// Batches are serialized: a batch holds the engine lock from
/// `begin_batch` until it is committed or dropped. Changes are applied in
/// place and undone if the batch is dropped without committing.
///
/// Disposing the engine keeps its data; initializing it again reopens it,
/// which is how tests simulate a process restart.
///
/// # Example
///
/// ```rust
/// use corvus_storage::{Etag, JsonObject, MemoryStorage, StorageActions, TransactionalStorage};
///
/// let storage = MemoryStorage::new();
/// storage.initialize().unwrap();
///
/// let mut batch = storage.begin_batch().unwrap();
/// batch
///     .documents()
///     .add_document("users/1", None, Etag::from_parts(1, 1), JsonObject::new(), JsonObject::new())
///     .unwrap();
/// batch.commit().unwrap();
///
/// let mut batch = storage.begin_batch().unwrap();
/// assert!(batch.documents().document_by_key("users/1").unwrap().is_some());
/// ```
#[derive(Debug)]
pub struct MemoryStorage {
    id: Uuid,
    tables: Mutex<Tables>,
    identities: Mutex<HashMap<String, i64>>,
    index_generations: AtomicU64,
    initialized: AtomicBool,
    disposed: AtomicBool,
}

impl MemoryStorage {
    /// Creates an empty engine with a random instance id.
    #[must_use]
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4())
    }

    /// Creates an empty engine with a fixed instance id.
    #[must_use]
    pub fn with_id(id: Uuid) -> Self {
        Self {
            id,
            tables: Mutex::new(Tables::default()),
            identities: Mutex::new(HashMap::new()),
            index_generations: AtomicU64::new(0),
            initialized: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionalStorage for MemoryStorage {
    fn id(&self) -> Uuid {
        self.id
    }

    fn initialize(&self) -> StorageResult<bool> {
        self.disposed.store(false, Ordering::SeqCst);
        let first_open = !self.initialized.swap(true, Ordering::SeqCst);
        Ok(first_open && self.tables.lock().is_empty())
    }

    fn begin_batch(&self) -> StorageResult<Box<dyn StorageActions + '_>> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(StorageError::Disposed);
        }
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(StorageError::NotInitialized);
        }
        Ok(Box::new(MemoryBatch {
            tables: self.tables.lock(),
            identities: &self.identities,
            index_generations: &self.index_generations,
            undo: Vec::new(),
            tasks_snapshot: None,
            commit_actions: Vec::new(),
            committed: false,
        }))
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

/// A batch over [`MemoryStorage`].
struct MemoryBatch<'a> {
    tables: MutexGuard<'a, Tables>,
    identities: &'a Mutex<HashMap<String, i64>>,
    // Never rolled back, so a dropped batch cannot hand out a generation twice.
    index_generations: &'a AtomicU64,
    undo: Vec<Undo>,
    tasks_snapshot: Option<VecDeque<IndexTask>>,
    commit_actions: Vec<CommitAction>,
    committed: bool,
}

impl MemoryBatch<'_> {
    fn replace_document(&mut self, key: &str, next: Option<JsonDocument>) -> Option<JsonDocument> {
        let previous = self.tables.swap_document(key, next);
        let key = key.to_string();
        let restore = previous.clone();
        self.undo.push(Box::new(move |tables: &mut Tables| {
            tables.swap_document(&key, restore);
        }));
        previous
    }

    fn replace_attachment(&mut self, key: &str, next: Option<Attachment>) -> Option<Attachment> {
        let previous = self.tables.swap_attachment(key, next);
        let key = key.to_string();
        let restore = previous.clone();
        self.undo.push(Box::new(move |tables: &mut Tables| {
            tables.swap_attachment(&key, restore);
        }));
        previous
    }

    fn replace_transaction(
        &mut self,
        id: Uuid,
        next: Option<TransactionRecord>,
    ) -> Option<TransactionRecord> {
        let previous = match next {
            Some(record) => self.tables.transactions.insert(id, record),
            None => self.tables.transactions.remove(&id),
        };
        self.undo.push(Box::new(move |tables: &mut Tables| match previous {
            Some(record) => {
                tables.transactions.insert(id, record);
            }
            None => {
                tables.transactions.remove(&id);
            }
        }));
        previous
    }

    fn replace_document_in_tx(
        &mut self,
        key: &str,
        next: Option<DocumentInTransaction>,
    ) -> Option<DocumentInTransaction> {
        let previous = match next {
            Some(write) => {
                self.tables.tx_write_seq += 1;
                let seq = self.tables.tx_write_seq;
                self.tables.documents_in_tx.insert(key.to_string(), (seq, write))
            }
            None => self.tables.documents_in_tx.remove(key),
        };
        let key = key.to_string();
        let restore = previous.clone();
        self.undo.push(Box::new(move |tables: &mut Tables| match restore {
            Some(entry) => {
                tables.documents_in_tx.insert(key, entry);
            }
            None => {
                tables.documents_in_tx.remove(&key);
            }
        }));
        previous.map(|(_, write)| write)
    }

    fn replace_index(&mut self, name: &str, next: Option<IndexStats>) -> Option<IndexStats> {
        let previous = match next {
            Some(stats) => self.tables.indexes.insert(name.to_string(), stats),
            None => self.tables.indexes.remove(name),
        };
        let name = name.to_string();
        let restore = previous.clone();
        self.undo.push(Box::new(move |tables: &mut Tables| match restore {
            Some(stats) => {
                tables.indexes.insert(name, stats);
            }
            None => {
                tables.indexes.remove(&name);
            }
        }));
        previous
    }

    fn touch_tasks(&mut self) {
        if self.tasks_snapshot.is_none() {
            self.tasks_snapshot = Some(self.tables.tasks.clone());
        }
    }
}

impl Drop for MemoryBatch<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Some(snapshot) = self.tasks_snapshot.take() {
            self.tables.tasks = snapshot;
        }
        while let Some(undo) = self.undo.pop() {
            undo(&mut self.tables);
        }
    }
}

impl StorageActions for MemoryBatch<'_> {
    fn documents(&mut self) -> &mut dyn DocumentStorageActions {
        self
    }

    fn attachments(&mut self) -> &mut dyn AttachmentStorageActions {
        self
    }

    fn transactions(&mut self) -> &mut dyn TransactionStorageActions {
        self
    }

    fn tasks(&mut self) -> &mut dyn TaskStorageActions {
        self
    }

    fn indexing(&mut self) -> &mut dyn IndexingStorageActions {
        self
    }

    fn general(&mut self) -> &mut dyn GeneralStorageActions {
        self
    }

    fn on_commit(&mut self, action: CommitAction) {
        self.commit_actions.push(action);
    }

    fn commit(mut self: Box<Self>) -> StorageResult<()> {
        self.committed = true;
        self.undo.clear();
        self.tasks_snapshot = None;
        let actions = std::mem::take(&mut self.commit_actions);
        // Release the engine lock before running deferred work.
        drop(self);
        for action in actions {
            action();
        }
        Ok(())
    }
}

impl DocumentStorageActions for MemoryBatch<'_> {
    fn document_by_key(&self, key: &str) -> StorageResult<Option<JsonDocument>> {
        Ok(self.tables.documents.get(key).cloned())
    }

    fn add_document(
        &mut self,
        key: &str,
        expected_etag: Option<Etag>,
        new_etag: Etag,
        data: JsonObject,
        metadata: JsonObject,
    ) -> StorageResult<()> {
        if let (Some(expected), Some(existing)) = (expected_etag, self.tables.documents.get(key)) {
            if existing.etag != expected {
                return Err(StorageError::etag_mismatch(
                    "PUT",
                    key,
                    Some(expected),
                    Some(existing.etag),
                ));
            }
        }
        let document = JsonDocument {
            key: key.to_string(),
            data,
            metadata,
            etag: new_etag,
            last_modified: SystemTime::now(),
        };
        self.replace_document(key, Some(document));
        Ok(())
    }

    fn delete_document(
        &mut self,
        key: &str,
        expected_etag: Option<Etag>,
    ) -> StorageResult<Option<JsonObject>> {
        let Some(existing) = self.tables.documents.get(key) else {
            return Ok(None);
        };
        if let Some(expected) = expected_etag {
            if existing.etag != expected {
                return Err(StorageError::etag_mismatch(
                    "DELETE",
                    key,
                    Some(expected),
                    Some(existing.etag),
                ));
            }
        }
        Ok(self.replace_document(key, None).map(|doc| doc.metadata))
    }

    fn documents_by_reverse_update_order(
        &self,
        start: usize,
        take: usize,
    ) -> StorageResult<Vec<JsonDocument>> {
        Ok(self
            .tables
            .documents_by_etag
            .values()
            .rev()
            .skip(start)
            .take(take)
            .filter_map(|key| self.tables.documents.get(key).cloned())
            .collect())
    }

    fn documents_after(&self, etag: Etag, take: usize) -> StorageResult<Vec<JsonDocument>> {
        Ok(self
            .tables
            .documents_by_etag
            .range((Bound::Excluded(etag), Bound::Unbounded))
            .take(take)
            .filter_map(|(_, key)| self.tables.documents.get(key).cloned())
            .collect())
    }

    fn documents_count(&self) -> StorageResult<u64> {
        Ok(self.tables.documents.len() as u64)
    }

    fn last_document_etag(&self) -> StorageResult<Option<Etag>> {
        Ok(self.tables.documents_by_etag.keys().next_back().copied())
    }
}

impl AttachmentStorageActions for MemoryBatch<'_> {
    fn attachment(&self, key: &str) -> StorageResult<Option<Attachment>> {
        Ok(self.tables.attachments.get(key).cloned())
    }

    fn add_attachment(
        &mut self,
        key: &str,
        expected_etag: Option<Etag>,
        new_etag: Etag,
        data: Vec<u8>,
        metadata: JsonObject,
    ) -> StorageResult<()> {
        if let (Some(expected), Some(existing)) = (expected_etag, self.tables.attachments.get(key))
        {
            if existing.etag != expected {
                return Err(StorageError::etag_mismatch(
                    "PUT",
                    key,
                    Some(expected),
                    Some(existing.etag),
                ));
            }
        }
        let attachment = Attachment {
            key: key.to_string(),
            data,
            metadata,
            etag: new_etag,
        };
        self.replace_attachment(key, Some(attachment));
        Ok(())
    }

    fn delete_attachment(&mut self, key: &str, expected_etag: Option<Etag>) -> StorageResult<bool> {
        let Some(existing) = self.tables.attachments.get(key) else {
            return Ok(false);
        };
        if let Some(expected) = expected_etag {
            if existing.etag != expected {
                return Err(StorageError::etag_mismatch(
                    "DELETE",
                    key,
                    Some(expected),
                    Some(existing.etag),
                ));
            }
        }
        self.replace_attachment(key, None);
        Ok(true)
    }

    fn attachments_by_reverse_update_order(
        &self,
        start: usize,
        take: usize,
    ) -> StorageResult<Vec<AttachmentInformation>> {
        Ok(self
            .tables
            .attachments_by_etag
            .values()
            .rev()
            .skip(start)
            .take(take)
            .filter_map(|key| self.tables.attachments.get(key))
            .map(AttachmentInformation::from)
            .collect())
    }

    fn attachments_after(
        &self,
        etag: Etag,
        take: usize,
    ) -> StorageResult<Vec<AttachmentInformation>> {
        Ok(self
            .tables
            .attachments_by_etag
            .range((Bound::Excluded(etag), Bound::Unbounded))
            .take(take)
            .filter_map(|(_, key)| self.tables.attachments.get(key))
            .map(AttachmentInformation::from)
            .collect())
    }

    fn attachments_with_prefix(&self, prefix: &str) -> StorageResult<Vec<AttachmentInformation>> {
        Ok(self
            .tables
            .attachments
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(_, attachment)| AttachmentInformation::from(attachment))
            .collect())
    }
}

impl TransactionStorageActions for MemoryBatch<'_> {
    fn transaction(&self, id: Uuid) -> StorageResult<Option<TransactionRecord>> {
        Ok(self.tables.transactions.get(&id).copied())
    }

    fn put_transaction(&mut self, record: TransactionRecord) -> StorageResult<()> {
        self.replace_transaction(record.id, Some(record));
        Ok(())
    }

    fn remove_transaction(&mut self, id: Uuid) -> StorageResult<bool> {
        Ok(self.replace_transaction(id, None).is_some())
    }

    fn transaction_ids(&self) -> StorageResult<Vec<Uuid>> {
        let mut ids: Vec<Uuid> = self.tables.transactions.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    fn document_in_transaction(&self, key: &str) -> StorageResult<Option<DocumentInTransaction>> {
        Ok(self
            .tables
            .documents_in_tx
            .get(key)
            .map(|(_, write)| write.clone()))
    }

    fn put_document_in_transaction(&mut self, write: DocumentInTransaction) -> StorageResult<()> {
        let key = write.key.clone();
        self.replace_document_in_tx(&key, Some(write));
        Ok(())
    }

    fn remove_document_in_transaction(
        &mut self,
        key: &str,
    ) -> StorageResult<Option<DocumentInTransaction>> {
        Ok(self.replace_document_in_tx(key, None))
    }

    fn documents_in_transaction(&self, id: Uuid) -> StorageResult<Vec<DocumentInTransaction>> {
        let mut writes: Vec<&(u64, DocumentInTransaction)> = self
            .tables
            .documents_in_tx
            .values()
            .filter(|(_, write)| write.tx_id == id)
            .collect();
        writes.sort_by_key(|(seq, _)| *seq);
        Ok(writes.into_iter().map(|(_, write)| write.clone()).collect())
    }
}

impl TaskStorageActions for MemoryBatch<'_> {
    fn add_task(&mut self, task: IndexTask) -> StorageResult<()> {
        self.touch_tasks();
        self.tables.tasks.push_back(task);
        Ok(())
    }

    fn dequeue_merged_task(&mut self, max_merge: usize) -> StorageResult<Option<IndexTask>> {
        self.touch_tasks();
        let Some(mut task) = self.tables.tasks.pop_front() else {
            return Ok(None);
        };
        let mut merged = 0;
        let mut remaining = VecDeque::with_capacity(self.tables.tasks.len());
        while let Some(next) = self.tables.tasks.pop_front() {
            if merged < max_merge && task.can_merge(&next) {
                task.merge(next);
                merged += 1;
            } else {
                remaining.push_back(next);
            }
        }
        self.tables.tasks = remaining;
        Ok(Some(task))
    }

    fn has_tasks(&self) -> StorageResult<bool> {
        Ok(!self.tables.tasks.is_empty())
    }

    fn has_tasks_for(&self, index: &str) -> StorageResult<bool> {
        Ok(self.tables.tasks.iter().any(|task| task.index == index))
    }

    fn approximate_task_count(&self) -> StorageResult<u64> {
        Ok(self.tables.tasks.len() as u64)
    }
}

impl IndexingStorageActions for MemoryBatch<'_> {
    fn add_index(&mut self, name: &str) -> StorageResult<u64> {
        let generation = self.index_generations.fetch_add(1, Ordering::SeqCst) + 1;
        self.replace_index(name, Some(IndexStats::new(name, generation)));
        Ok(generation)
    }

    fn delete_index(
        &mut self,
        name: &str,
        expected_generation: Option<u64>,
    ) -> StorageResult<bool> {
        if let Some(expected) = expected_generation {
            let actual = self.tables.indexes.get(name).map(|stats| stats.generation);
            if actual != Some(expected) {
                return Err(StorageError::index_generation_mismatch(name, expected, actual));
            }
        }
        let existed = self.replace_index(name, None).is_some();
        if self.tables.tasks.iter().any(|task| task.index == name) {
            self.touch_tasks();
            self.tables.tasks.retain(|task| task.index != name);
        }
        Ok(existed)
    }

    fn index_stats(&self, name: &str) -> StorageResult<Option<IndexStats>> {
        Ok(self.tables.indexes.get(name).cloned())
    }

    fn indexes(&self) -> StorageResult<Vec<IndexStats>> {
        Ok(self.tables.indexes.values().cloned().collect())
    }

    fn record_indexing(
        &mut self,
        name: &str,
        generation: u64,
        last_etag: Etag,
        attempts: u64,
        errors: u64,
    ) -> StorageResult<()> {
        let current = match self.tables.indexes.get(name) {
            Some(current) if current.generation == generation => current,
            other => {
                let actual = other.map(|stats| stats.generation);
                return Err(StorageError::index_generation_mismatch(name, generation, actual));
            }
        };
        let mut next = current.clone();
        next.last_indexed_etag = next.last_indexed_etag.max(last_etag);
        next.attempts += attempts;
        next.errors += errors;
        next.last_indexed_at = Some(SystemTime::now());
        self.replace_index(name, Some(next));
        Ok(())
    }
}

impl GeneralStorageActions for MemoryBatch<'_> {
    fn next_identity_value(&mut self, name: &str) -> StorageResult<i64> {
        let mut identities = self.identities.lock();
        let value = identities.entry(name.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }
}
