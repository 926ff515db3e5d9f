//! Trigger pipeline.
//!
//! Triggers intercept mutations and reads of documents and attachments.
//! Each trigger implements one capability:
//!
//! | Capability | Put | Delete | Runs |
//! |------------|-----|--------|------|
//! | Veto | [`PutVeto`] | [`DeleteVeto`] | before anything else; first refusal aborts |
//! | Mutate | [`PutMutator`] | [`DeleteMutator`] | in order, may rewrite the item |
//! | Notify | [`PutNotifier`] | [`DeleteNotifier`] | after the write, in the same batch |
//! | Notify after commit | [`PutCommitNotifier`] | [`DeleteCommitNotifier`] | once the batch is durable |
//!
//! Reads go through [`ReadTrigger`]s on every access; nothing is cached.
//!
//! Put capabilities are generic over the item body: `JsonObject` for
//! documents and `Vec<u8>` for attachments. Registration happens once,
//! through [`TriggersBuilder`], before the database opens.

mod pipeline;
mod registry;

pub(crate) use pipeline::{
    apply_read_triggers, assert_delete_allowed, assert_put_allowed, is_readable,
    schedule_delete_commit, schedule_put_commit,
};
pub use registry::{EntityTriggers, TriggerDescription, Triggers, TriggersBuilder};

use crate::context::OperationContext;
use crate::error::CoreResult;
use corvus_storage::{Etag, JsonObject, TransactionInformation};

/// Answer of a put or delete veto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VetoResult {
    /// The operation may proceed.
    Allowed,
    /// The operation is refused for the given reason.
    Denied(String),
}

impl VetoResult {
    /// Refuses with a reason.
    pub fn deny(reason: impl Into<String>) -> Self {
        Self::Denied(reason.into())
    }

    /// Returns true for [`VetoResult::Allowed`].
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Answer of a read veto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadVetoResult {
    /// The item is returned as stored.
    Allowed,
    /// The item stays visible, but its body is blanked and its metadata
    /// replaced by a read-veto block carrying the reason.
    Deny(String),
    /// The item is hidden as if absent.
    Ignore,
}

impl ReadVetoResult {
    /// Denies with a reason.
    pub fn deny(reason: impl Into<String>) -> Self {
        Self::Deny(reason.into())
    }
}

/// Why an item is being read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadOperation {
    /// Direct load or listing.
    Load,
    /// Query result.
    Query,
    /// Read by the background indexer.
    Index,
}

/// Can refuse a put.
pub trait PutVeto<B>: Send + Sync {
    /// Decides whether `key` may be written.
    ///
    /// # Errors
    ///
    /// An error aborts the whole operation.
    fn allow_put(
        &self,
        ctx: &OperationContext<'_>,
        key: &str,
        body: &B,
        metadata: &JsonObject,
        tx: Option<&TransactionInformation>,
    ) -> CoreResult<VetoResult>;

    /// Identity used in veto messages.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Rewrites an item before it is stored.
pub trait PutMutator<B>: Send + Sync {
    /// Called before the item is persisted; may change body and metadata.
    ///
    /// # Errors
    ///
    /// An error aborts the whole operation.
    fn on_put(
        &self,
        ctx: &mut OperationContext<'_>,
        key: &str,
        body: &mut B,
        metadata: &mut JsonObject,
        tx: Option<&TransactionInformation>,
    ) -> CoreResult<()>;

    /// Identity used in diagnostics.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Observes a stored item inside the writing batch.
pub trait PutNotifier<B>: Send + Sync {
    /// Called after the item has been written, before the batch commits.
    ///
    /// # Errors
    ///
    /// An error aborts the whole operation.
    fn after_put(
        &self,
        ctx: &mut OperationContext<'_>,
        key: &str,
        body: &B,
        metadata: &JsonObject,
        etag: Etag,
        tx: Option<&TransactionInformation>,
    ) -> CoreResult<()>;

    /// Identity used in diagnostics.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Observes a stored item once it is durable.
///
/// Failures are logged; they never undo the write.
pub trait PutCommitNotifier<B>: Send + Sync {
    /// Called after the batch committed.
    ///
    /// # Errors
    ///
    /// Errors are logged and otherwise ignored.
    fn after_commit(&self, key: &str, body: &B, metadata: &JsonObject, etag: Etag)
        -> CoreResult<()>;

    /// Identity used in diagnostics.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Can refuse a delete.
pub trait DeleteVeto: Send + Sync {
    /// Decides whether `key` may be deleted.
    ///
    /// # Errors
    ///
    /// An error aborts the whole operation.
    fn allow_delete(
        &self,
        ctx: &OperationContext<'_>,
        key: &str,
        tx: Option<&TransactionInformation>,
    ) -> CoreResult<VetoResult>;

    /// Identity used in veto messages.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Runs before an item is deleted.
pub trait DeleteMutator: Send + Sync {
    /// Called before the delete is applied.
    ///
    /// # Errors
    ///
    /// An error aborts the whole operation.
    fn on_delete(
        &self,
        ctx: &mut OperationContext<'_>,
        key: &str,
        tx: Option<&TransactionInformation>,
    ) -> CoreResult<()>;

    /// Identity used in diagnostics.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Observes a delete inside the deleting batch. Only called if the item existed.
pub trait DeleteNotifier: Send + Sync {
    /// Called after the item has been removed.
    ///
    /// # Errors
    ///
    /// An error aborts the whole operation.
    fn after_delete(
        &self,
        ctx: &mut OperationContext<'_>,
        key: &str,
        tx: Option<&TransactionInformation>,
    ) -> CoreResult<()>;

    /// Identity used in diagnostics.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Observes a delete once it is durable.
pub trait DeleteCommitNotifier: Send + Sync {
    /// Called after the batch committed.
    ///
    /// # Errors
    ///
    /// Errors are logged and otherwise ignored.
    fn after_commit(&self, key: &str) -> CoreResult<()>;

    /// Identity used in diagnostics.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Filters and transforms items as they are read.
pub trait ReadTrigger<B>: Send + Sync {
    /// Decides whether the item is visible.
    ///
    /// # Errors
    ///
    /// An error fails the read.
    fn allow_read(
        &self,
        key: &str,
        body: &B,
        metadata: &JsonObject,
        operation: ReadOperation,
    ) -> CoreResult<ReadVetoResult> {
        let _ = (key, body, metadata, operation);
        Ok(ReadVetoResult::Allowed)
    }

    /// Transforms a visible item. Runs after every trigger's veto.
    fn on_read(&self, key: &str, body: &mut B, metadata: &mut JsonObject, operation: ReadOperation) {
        let _ = (key, body, metadata, operation);
    }

    /// Identity written into read-veto metadata.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// One-off startup work run inside the opening batch.
pub trait DatabaseInitializer: Send + Sync {
    /// Called once when the database opens.
    ///
    /// # Errors
    ///
    /// An error aborts opening and disposes the storage.
    fn initialize(&self, ctx: &mut OperationContext<'_>) -> CoreResult<()>;

    /// Identity used in diagnostics.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}
