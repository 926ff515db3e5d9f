//! Uniform access to documents and attachments.

use crate::lineage::CONFLICTS;
use corvus_core::{CoreError, CoreResult, EntityKind, Etag, JsonObject, OperationContext};
use serde_json::Value;

/// A raw stored item, read without read triggers.
#[derive(Debug, Clone)]
pub struct StoredItem<B> {
    /// Item body.
    pub data: B,
    /// Item metadata.
    pub metadata: JsonObject,
    /// Current etag.
    pub etag: Etag,
}

/// Body type of a replicated entity kind.
///
/// Implemented for `JsonObject` (documents) and `Vec<u8>` (attachments),
/// so every replication trigger and the receiver are written once.
pub trait ReplicatedEntity: Clone + Default + Send + Sync + 'static {
    /// The kind this body belongs to.
    const KIND: EntityKind;

    /// Reads the stored item under `key`, bypassing read triggers.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    fn stored(ctx: &mut OperationContext<'_>, key: &str) -> CoreResult<Option<StoredItem<Self>>>;

    /// Writes an item through the operation's batch.
    ///
    /// # Errors
    ///
    /// Returns `Concurrency` on a stale etag, or a trigger failure.
    fn put(
        ctx: &mut OperationContext<'_>,
        key: &str,
        etag: Option<Etag>,
        data: Self,
        metadata: JsonObject,
    ) -> CoreResult<Etag>;

    /// Deletes an item through the operation's batch.
    ///
    /// # Errors
    ///
    /// Returns `Concurrency` on a stale etag, or a trigger failure.
    fn delete(ctx: &mut OperationContext<'_>, key: &str, etag: Option<Etag>) -> CoreResult<bool>;

    /// Body of a conflict record listing `ids`.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the body cannot be encoded.
    fn conflict_body(ids: &[String]) -> CoreResult<Self>;
}

fn conflict_object(ids: &[String]) -> JsonObject {
    let mut body = JsonObject::new();
    body.insert(
        CONFLICTS.to_string(),
        Value::Array(ids.iter().cloned().map(Value::String).collect()),
    );
    body
}

impl ReplicatedEntity for JsonObject {
    const KIND: EntityKind = EntityKind::Document;

    fn stored(ctx: &mut OperationContext<'_>, key: &str) -> CoreResult<Option<StoredItem<Self>>> {
        Ok(ctx
            .actions()
            .documents()
            .document_by_key(key)?
            .map(|doc| StoredItem {
                data: doc.data,
                metadata: doc.metadata,
                etag: doc.etag,
            }))
    }

    fn put(
        ctx: &mut OperationContext<'_>,
        key: &str,
        etag: Option<Etag>,
        data: Self,
        metadata: JsonObject,
    ) -> CoreResult<Etag> {
        Ok(ctx.put(key, etag, data, metadata, None)?.etag)
    }

    fn delete(ctx: &mut OperationContext<'_>, key: &str, etag: Option<Etag>) -> CoreResult<bool> {
        ctx.delete(key, etag, None)
    }

    fn conflict_body(ids: &[String]) -> CoreResult<Self> {
        Ok(conflict_object(ids))
    }
}

impl ReplicatedEntity for Vec<u8> {
    const KIND: EntityKind = EntityKind::Attachment;

    fn stored(ctx: &mut OperationContext<'_>, key: &str) -> CoreResult<Option<StoredItem<Self>>> {
        Ok(ctx
            .actions()
            .attachments()
            .attachment(key)?
            .map(|attachment| StoredItem {
                data: attachment.data,
                metadata: attachment.metadata,
                etag: attachment.etag,
            }))
    }

    fn put(
        ctx: &mut OperationContext<'_>,
        key: &str,
        etag: Option<Etag>,
        data: Self,
        metadata: JsonObject,
    ) -> CoreResult<Etag> {
        ctx.put_static(key, etag, data, metadata)
    }

    fn delete(ctx: &mut OperationContext<'_>, key: &str, etag: Option<Etag>) -> CoreResult<bool> {
        ctx.delete_static(key, etag)
    }

    fn conflict_body(ids: &[String]) -> CoreResult<Self> {
        serde_json::to_vec(&conflict_object(ids))
            .map_err(|e| CoreError::serialization(e.to_string()))
    }
}
