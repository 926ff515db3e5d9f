//! Replication triggers.
//!
//! Registered per entity kind by [`crate::Replication::register`], in
//! this order:
//!
//! 1. [`RemoveConflictTrigger`] clears a conflict overwritten directly
//! 2. [`AncestryTrigger`] stamps version, source and parent lineage
//! 3. [`VirtualDeleteTrigger`] replaces deletes with tombstones
//! 4. [`ReplicationReadTrigger`] hides tombstones and guards conflicts
//!
//! Every trigger stands aside while the operation is applying an inbound
//! replicated write ([`OperationContext::is_replicating`]).

use crate::entity::ReplicatedEntity;
use crate::hilo::ReplicationHiLo;
use crate::lineage::{
    clear_parent, conflict_ids, is_conflict, is_conflict_version, is_tombstone, Lineage,
    DELETE_MARKER, REPLICATION_CONFLICT, REPLICATION_CONFLICT_DOCUMENT, REPLICATION_SOURCE,
    REPLICATION_VERSION,
};
use corvus_core::{
    is_system_key, CoreError, CoreResult, DatabaseInitializer, DeleteMutator, DeleteNotifier,
    JsonObject, OperationContext, PutMutator, ReadOperation, ReadTrigger, ReadVetoResult,
    TransactionInformation,
};
use serde_json::{json, Value};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// Stamps local writes with replication lineage.
pub struct AncestryTrigger<B> {
    hilo: Arc<ReplicationHiLo>,
    _kind: PhantomData<fn() -> B>,
}

impl<B> AncestryTrigger<B> {
    /// Creates the trigger over a shared version generator.
    #[must_use]
    pub fn new(hilo: Arc<ReplicationHiLo>) -> Self {
        Self {
            hilo,
            _kind: PhantomData,
        }
    }
}

impl<B: ReplicatedEntity> PutMutator<B> for AncestryTrigger<B> {
    fn on_put(
        &self,
        ctx: &mut OperationContext<'_>,
        key: &str,
        _body: &mut B,
        metadata: &mut JsonObject,
        _tx: Option<&TransactionInformation>,
    ) -> CoreResult<()> {
        if is_system_key(key) || ctx.is_replicating() {
            return Ok(());
        }
        if let Some(existing) = B::stored(ctx, key)? {
            match Lineage::current(&existing.metadata) {
                Some(lineage) => lineage.write_as_parent(metadata),
                None => clear_parent(metadata),
            }
        }
        let version = self.hilo.next_id(ctx.actions().general())?;
        let source = ctx.database().storage_id();
        metadata.insert(REPLICATION_VERSION.to_string(), Value::from(version));
        metadata.insert(REPLICATION_SOURCE.to_string(), Value::from(source.to_string()));
        Ok(())
    }

    fn name(&self) -> &str {
        "AncestryTrigger"
    }
}

/// Resolves a conflict when its key is written or deleted directly.
///
/// Deletes every competing version listed by the conflict record and
/// strips conflict flags from caller metadata.
pub struct RemoveConflictTrigger<B> {
    _kind: PhantomData<fn() -> B>,
}

impl<B> RemoveConflictTrigger<B> {
    /// Creates the trigger.
    #[must_use]
    pub fn new() -> Self {
        Self { _kind: PhantomData }
    }
}

impl<B> Default for RemoveConflictTrigger<B> {
    fn default() -> Self {
        Self::new()
    }
}

fn remove_conflict_versions<B: ReplicatedEntity>(
    ctx: &mut OperationContext<'_>,
    key: &str,
) -> CoreResult<()> {
    let Some(existing) = B::stored(ctx, key)? else {
        return Ok(());
    };
    if !is_conflict(&existing.metadata) {
        return Ok(());
    }
    let ids = conflict_ids(&existing.metadata);
    debug!(
        target: "corvus::replication",
        key,
        kind = %B::KIND,
        versions = ids.len(),
        "Resolving conflict by direct write"
    );
    ctx.enter_replication(|ctx| {
        for id in &ids {
            B::delete(ctx, id, None)?;
        }
        Ok(())
    })
}

impl<B: ReplicatedEntity> PutMutator<B> for RemoveConflictTrigger<B> {
    fn on_put(
        &self,
        ctx: &mut OperationContext<'_>,
        key: &str,
        _body: &mut B,
        metadata: &mut JsonObject,
        _tx: Option<&TransactionInformation>,
    ) -> CoreResult<()> {
        if ctx.is_replicating() {
            return Ok(());
        }
        metadata.remove(REPLICATION_CONFLICT);
        metadata.remove(REPLICATION_CONFLICT_DOCUMENT);
        remove_conflict_versions::<B>(ctx, key)
    }

    fn name(&self) -> &str {
        "RemoveConflictTrigger"
    }
}

impl<B: ReplicatedEntity> DeleteMutator for RemoveConflictTrigger<B> {
    fn on_delete(
        &self,
        ctx: &mut OperationContext<'_>,
        key: &str,
        _tx: Option<&TransactionInformation>,
    ) -> CoreResult<()> {
        if ctx.is_replicating() {
            return Ok(());
        }
        remove_conflict_versions::<B>(ctx, key)
    }

    fn name(&self) -> &str {
        "RemoveConflictTrigger"
    }
}

/// Replaces a physical delete with a tombstone.
///
/// The lineage of the deleted version is captured before the delete and
/// written as the parent of the tombstone, which then gets a fresh stamp
/// from [`AncestryTrigger`].
pub struct VirtualDeleteTrigger<B> {
    _kind: PhantomData<fn() -> B>,
}

impl<B> VirtualDeleteTrigger<B> {
    /// Creates the trigger.
    #[must_use]
    pub fn new() -> Self {
        Self { _kind: PhantomData }
    }
}

impl<B> Default for VirtualDeleteTrigger<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: ReplicatedEntity> VirtualDeleteTrigger<B> {
    fn stash_key(key: &str) -> String {
        format!("replication.deleted/{}/{key}", B::KIND)
    }
}

impl<B: ReplicatedEntity> DeleteMutator for VirtualDeleteTrigger<B> {
    fn on_delete(
        &self,
        ctx: &mut OperationContext<'_>,
        key: &str,
        _tx: Option<&TransactionInformation>,
    ) -> CoreResult<()> {
        if ctx.is_replicating() || is_system_key(key) {
            return Ok(());
        }
        let existing = match B::stored(ctx, key)? {
            Some(existing) if !is_tombstone(&existing.metadata) => existing,
            _ => return Ok(()),
        };
        let lineage = Lineage::current(&existing.metadata);
        let captured = match lineage {
            Some(lineage) => json!({"source": lineage.source, "version": lineage.version}),
            None => json!({}),
        };
        ctx.stash(Self::stash_key(key), captured);
        Ok(())
    }

    fn name(&self) -> &str {
        "VirtualDeleteTrigger"
    }
}

impl<B: ReplicatedEntity> DeleteNotifier for VirtualDeleteTrigger<B> {
    fn after_delete(
        &self,
        ctx: &mut OperationContext<'_>,
        key: &str,
        _tx: Option<&TransactionInformation>,
    ) -> CoreResult<()> {
        if ctx.is_replicating() {
            return Ok(());
        }
        let Some(captured) = ctx.take_stashed(&Self::stash_key(key)) else {
            return Ok(());
        };
        let mut metadata = JsonObject::new();
        metadata.insert(DELETE_MARKER.to_string(), Value::Bool(true));
        if let (Some(source), Some(version)) = (captured.get("source"), captured.get("version")) {
            Lineage {
                source: source.clone(),
                version: version.clone(),
            }
            .write_as_parent(&mut metadata);
        }
        B::put(ctx, key, None, B::default(), metadata)?;
        debug!(target: "corvus::replication", key, kind = %B::KIND, "Replaced delete with tombstone");
        Ok(())
    }

    fn name(&self) -> &str {
        "VirtualDeleteTrigger"
    }
}

/// Hides tombstones and fails loads of conflicted keys.
///
/// Indexing and queries skip conflict records and competing versions
/// instead of failing.
pub struct ReplicationReadTrigger<B> {
    _kind: PhantomData<fn() -> B>,
}

impl<B> ReplicationReadTrigger<B> {
    /// Creates the trigger.
    #[must_use]
    pub fn new() -> Self {
        Self { _kind: PhantomData }
    }
}

impl<B> Default for ReplicationReadTrigger<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: ReplicatedEntity> ReadTrigger<B> for ReplicationReadTrigger<B> {
    fn allow_read(
        &self,
        key: &str,
        _body: &B,
        metadata: &JsonObject,
        operation: ReadOperation,
    ) -> CoreResult<ReadVetoResult> {
        if is_tombstone(metadata) {
            return Ok(ReadVetoResult::Ignore);
        }
        if is_conflict(metadata) {
            return match operation {
                ReadOperation::Load => Err(CoreError::Conflict {
                    key: key.to_string(),
                    kind: B::KIND,
                    conflicted_version_ids: conflict_ids(metadata),
                }),
                ReadOperation::Query | ReadOperation::Index => Ok(ReadVetoResult::Ignore),
            };
        }
        if is_conflict_version(metadata) && operation == ReadOperation::Index {
            return Ok(ReadVetoResult::Ignore);
        }
        Ok(ReadVetoResult::Allowed)
    }

    fn name(&self) -> &str {
        "ReplicationReadTrigger"
    }
}

/// Reserves the first HiLo block when the database opens.
pub struct HiLoInitializer {
    hilo: Arc<ReplicationHiLo>,
}

impl HiLoInitializer {
    /// Creates the initializer.
    #[must_use]
    pub fn new(hilo: Arc<ReplicationHiLo>) -> Self {
        Self { hilo }
    }
}

impl DatabaseInitializer for HiLoInitializer {
    fn initialize(&self, ctx: &mut OperationContext<'_>) -> CoreResult<()> {
        self.hilo.seed(ctx.actions().general())
    }

    fn name(&self) -> &str {
        "HiLoInitializer"
    }
}
