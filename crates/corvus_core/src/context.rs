//! Per-operation context.

use crate::commands::{PatchRequest, PatchResult};
use crate::database::Database;
use crate::error::CoreResult;
use crate::types::PutResult;
use corvus_storage::{
    Attachment, Etag, JsonDocument, JsonObject, StorageActions, TransactionInformation,
};
use serde_json::Value;

/// State of one database operation, threaded through every trigger call.
///
/// A context wraps the storage batch the operation runs in. Work done
/// through the context (including nested puts and deletes issued by
/// triggers) joins that batch and commits or rolls back with it.
///
/// # Replication
///
/// While [`OperationContext::is_replicating`] is true, the write being
/// applied was received from another node. Replication triggers use it to
/// skip lineage stamping; the flag is scoped with
/// [`OperationContext::enter_replication`].
pub struct OperationContext<'a> {
    db: &'a Database,
    actions: &'a mut dyn StorageActions,
    replicating: bool,
    scratch: JsonObject,
    work_done: bool,
}

impl<'a> OperationContext<'a> {
    pub(crate) fn new(db: &'a Database, actions: &'a mut dyn StorageActions) -> Self {
        Self {
            db,
            actions,
            replicating: false,
            scratch: JsonObject::new(),
            work_done: false,
        }
    }

    /// The database this operation runs against.
    #[must_use]
    pub fn database(&self) -> &'a Database {
        self.db
    }

    /// The storage batch of this operation.
    pub fn actions(&mut self) -> &mut dyn StorageActions {
        &mut *self.actions
    }

    /// Returns true while applying a write received from another node.
    #[must_use]
    pub fn is_replicating(&self) -> bool {
        self.replicating
    }

    /// Runs `f` with the replication flag set, restoring it afterwards.
    ///
    /// # Errors
    ///
    /// Returns whatever `f` returns.
    pub fn enter_replication<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let previous = std::mem::replace(&mut self.replicating, true);
        let result = f(self);
        self.replicating = previous;
        result
    }

    /// Stores a value for a later trigger call of the same operation.
    pub fn stash(&mut self, name: impl Into<String>, value: Value) {
        self.scratch.insert(name.into(), value);
    }

    /// Removes and returns a stashed value.
    pub fn take_stashed(&mut self, name: &str) -> Option<Value> {
        self.scratch.remove(name)
    }

    pub(crate) fn mark_work(&mut self) {
        self.work_done = true;
    }

    pub(crate) fn has_work(&self) -> bool {
        self.work_done
    }

    /// Puts a document inside this operation's batch.
    ///
    /// # Errors
    ///
    /// See [`Database::put`].
    pub fn put(
        &mut self,
        key: &str,
        etag: Option<Etag>,
        data: JsonObject,
        metadata: JsonObject,
        tx: Option<&TransactionInformation>,
    ) -> CoreResult<PutResult> {
        let db = self.db;
        db.put_document(self, key, etag, data, metadata, tx)
    }

    /// Deletes a document inside this operation's batch.
    ///
    /// # Errors
    ///
    /// See [`Database::delete`].
    pub fn delete(
        &mut self,
        key: &str,
        etag: Option<Etag>,
        tx: Option<&TransactionInformation>,
    ) -> CoreResult<bool> {
        let db = self.db;
        db.delete_document(self, key, etag, tx)
    }

    /// Reads a document through the read triggers.
    ///
    /// # Errors
    ///
    /// See [`Database::get`].
    pub fn get(
        &mut self,
        key: &str,
        tx: Option<&TransactionInformation>,
    ) -> CoreResult<Option<JsonDocument>> {
        let db = self.db;
        db.get_document(self, key, tx)
    }

    /// Patches a document inside this operation's batch.
    ///
    /// # Errors
    ///
    /// See [`Database::apply_patch`].
    pub fn apply_patch(
        &mut self,
        key: &str,
        etag: Option<Etag>,
        patches: &[PatchRequest],
        tx: Option<&TransactionInformation>,
    ) -> CoreResult<PatchResult> {
        let db = self.db;
        db.patch_document(self, key, etag, patches, tx)
    }

    /// Puts an attachment inside this operation's batch.
    ///
    /// # Errors
    ///
    /// See [`Database::put_static`].
    pub fn put_static(
        &mut self,
        key: &str,
        etag: Option<Etag>,
        data: Vec<u8>,
        metadata: JsonObject,
    ) -> CoreResult<Etag> {
        let db = self.db;
        db.put_attachment(self, key, etag, data, metadata)
    }

    /// Deletes an attachment inside this operation's batch.
    ///
    /// # Errors
    ///
    /// See [`Database::delete_static`].
    pub fn delete_static(&mut self, key: &str, etag: Option<Etag>) -> CoreResult<bool> {
        let db = self.db;
        db.delete_attachment(self, key, etag)
    }

    /// Reads an attachment through the read triggers.
    ///
    /// # Errors
    ///
    /// See [`Database::get_static`].
    pub fn get_static(&mut self, key: &str) -> CoreResult<Option<Attachment>> {
        let db = self.db;
        db.get_attachment(self, key)
    }
}

impl std::fmt::Debug for OperationContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationContext")
            .field("replicating", &self.replicating)
            .field("work_done", &self.work_done)
            .finish_non_exhaustive()
    }
}
