//! Inbound replication.
//!
//! A pull replicator fetches items from a peer and hands them to
//! [`ReplicationReceiver`]. Each call applies its items in one storage
//! batch, with the operation flagged as replicating so local lineage
//! stamping and tombstoning stand aside.
//!
//! For every item the receiver compares the incoming lineage with the
//! local version of the key:
//!
//! | Local version | Incoming | Result |
//! |---------------|----------|--------|
//! | absent | anything | stored as is |
//! | same source, not conflicted | anything | replaces local |
//! | parent of incoming | anything | replaces local |
//! | otherwise | anything | conflict |
//!
//! A conflict stores both competing versions under
//! `{key}/conflicts/{id}` and replaces the key with a conflict record
//! listing them. Loading a conflicted key fails until it is overwritten
//! directly.

use crate::entity::{ReplicatedEntity, StoredItem};
use crate::error::ReplicationResult;
use crate::lineage::{
    conflict_ids, conflict_version_key, is_conflict, is_direct_child, same_source, Lineage,
    CONFLICTS, DELETE_MARKER, REPLICATION_CONFLICT, REPLICATION_CONFLICT_DOCUMENT,
};
use crate::source::{normalize_source, source_key, SourceReplicationInformation};
use corvus_core::{CoreResult, Database, Etag, JsonObject, OperationContext};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A document received from a peer.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicatedDocument {
    /// Document key.
    pub key: String,
    /// Etag of the document on the peer.
    pub etag: Etag,
    /// Document body.
    pub data: JsonObject,
    /// Document metadata, including the peer's lineage stamps.
    pub metadata: JsonObject,
}

/// An attachment received from a peer.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicatedAttachment {
    /// Attachment key.
    pub key: String,
    /// Etag of the attachment on the peer.
    pub etag: Etag,
    /// Raw content.
    pub data: Vec<u8>,
    /// Attachment metadata, including the peer's lineage stamps.
    pub metadata: JsonObject,
}

/// A delete received from a peer.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicatedDelete {
    /// Deleted key.
    pub key: String,
    /// Etag of the peer's tombstone.
    pub etag: Etag,
    /// Lineage of the peer's tombstone.
    pub metadata: JsonObject,
}

/// What happened to one received item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationOutcome {
    /// The key did not exist locally.
    Created,
    /// The item replaced the local version.
    Updated,
    /// The item conflicts with the local version.
    Conflicted {
        /// Ids of every competing version now listed for the key.
        conflicted_version_ids: Vec<String>,
    },
}

/// Applies replicated items and tracks per-source progress.
#[derive(Debug, Clone, Copy)]
pub struct ReplicationReceiver<'a> {
    db: &'a Database,
}

#[derive(Clone, Copy)]
enum Stream {
    Documents,
    Attachments,
}

impl<'a> ReplicationReceiver<'a> {
    /// Creates a receiver applying to `db`.
    #[must_use]
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Applies documents pulled from `source`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSource` for an empty source, or the first failing
    /// write; nothing is applied in that case.
    pub fn receive_documents(
        &self,
        source: &str,
        instance_id: Uuid,
        items: Vec<ReplicatedDocument>,
    ) -> ReplicationResult<Vec<ReplicationOutcome>> {
        let items = items
            .into_iter()
            .map(|item| (item.key, item.etag, item.data, item.metadata))
            .collect();
        self.receive::<JsonObject>(source, instance_id, Stream::Documents, items)
    }

    /// Applies attachments pulled from `source`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSource` for an empty source, or the first failing
    /// write; nothing is applied in that case.
    pub fn receive_attachments(
        &self,
        source: &str,
        instance_id: Uuid,
        items: Vec<ReplicatedAttachment>,
    ) -> ReplicationResult<Vec<ReplicationOutcome>> {
        let items = items
            .into_iter()
            .map(|item| (item.key, item.etag, item.data, item.metadata))
            .collect();
        self.receive::<Vec<u8>>(source, instance_id, Stream::Attachments, items)
    }

    /// Applies document deletes pulled from `source` as tombstones.
    ///
    /// # Errors
    ///
    /// See [`ReplicationReceiver::receive_documents`].
    pub fn receive_document_deletes(
        &self,
        source: &str,
        instance_id: Uuid,
        items: Vec<ReplicatedDelete>,
    ) -> ReplicationResult<Vec<ReplicationOutcome>> {
        let items = items.into_iter().map(tombstone::<JsonObject>).collect();
        self.receive::<JsonObject>(source, instance_id, Stream::Documents, items)
    }

    /// Applies attachment deletes pulled from `source` as tombstones.
    ///
    /// # Errors
    ///
    /// See [`ReplicationReceiver::receive_documents`].
    pub fn receive_attachment_deletes(
        &self,
        source: &str,
        instance_id: Uuid,
        items: Vec<ReplicatedDelete>,
    ) -> ReplicationResult<Vec<ReplicationOutcome>> {
        let items = items.into_iter().map(tombstone::<Vec<u8>>).collect();
        self.receive::<Vec<u8>>(source, instance_id, Stream::Attachments, items)
    }

    /// Returns what has been received from `source`.
    ///
    /// Trailing `/` are ignored, so `http://peer/` and `http://peer` name
    /// the same source. An unseen source yields the zero record.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSource` for an empty source.
    pub fn last_etag(&self, source: &str) -> ReplicationResult<SourceReplicationInformation> {
        let source = normalize_source(source)?;
        let info = self
            .db
            .execute(|ctx| ctx.enter_replication(|ctx| read_source(ctx, source)))?;
        debug!(
            target: "corvus::replication",
            source,
            info = %info,
            "Got replication last etag request"
        );
        Ok(info)
    }

    fn receive<B: ReplicatedEntity>(
        &self,
        source: &str,
        instance_id: Uuid,
        stream: Stream,
        items: Vec<(String, Etag, B, JsonObject)>,
    ) -> ReplicationResult<Vec<ReplicationOutcome>> {
        let source = normalize_source(source)?;
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let count = items.len();
        let outcomes = self.db.execute(|ctx| {
            ctx.enter_replication(|ctx| {
                let mut outcomes = Vec::with_capacity(items.len());
                let mut last_etag = None;
                for (key, etag, data, metadata) in items {
                    outcomes.push(apply_replicated(ctx, source, &key, data, metadata)?);
                    last_etag = last_etag.max(Some(etag));
                }
                if let Some(last_etag) = last_etag {
                    record_progress(ctx, source, instance_id, stream, last_etag)?;
                }
                Ok(outcomes)
            })
        })?;
        info!(
            target: "corvus::replication",
            source,
            items = count,
            conflicts = outcomes
                .iter()
                .filter(|o| matches!(o, ReplicationOutcome::Conflicted { .. }))
                .count(),
            "Applied replicated items"
        );
        Ok(outcomes)
    }
}

fn tombstone<B: ReplicatedEntity>(item: ReplicatedDelete) -> (String, Etag, B, JsonObject) {
    let mut metadata = item.metadata;
    metadata.insert(DELETE_MARKER.to_string(), Value::Bool(true));
    (item.key, item.etag, B::default(), metadata)
}

fn apply_replicated<B: ReplicatedEntity>(
    ctx: &mut OperationContext<'_>,
    source: &str,
    key: &str,
    data: B,
    metadata: JsonObject,
) -> CoreResult<ReplicationOutcome> {
    let Some(existing) = B::stored(ctx, key)? else {
        debug!(target: "corvus::replication", key, source, kind = %B::KIND, "New item replicated");
        B::put(ctx, key, None, data, metadata)?;
        return Ok(ReplicationOutcome::Created);
    };

    let accepts = !is_conflict(&existing.metadata)
        && (same_source(&existing.metadata, &metadata)
            || is_direct_child(&existing.metadata, &metadata));
    if accepts {
        debug!(target: "corvus::replication", key, source, kind = %B::KIND, "Existing item updated by replication");
        B::put(ctx, key, Some(existing.etag), data, metadata)?;
        return Ok(ReplicationOutcome::Updated);
    }

    materialize_conflict(ctx, source, key, existing, data, metadata)
}

fn materialize_conflict<B: ReplicatedEntity>(
    ctx: &mut OperationContext<'_>,
    source: &str,
    key: &str,
    existing: StoredItem<B>,
    data: B,
    metadata: JsonObject,
) -> CoreResult<ReplicationOutcome> {
    let incoming_id = conflict_version_key(key, version_id(&metadata, None));
    B::put(ctx, &incoming_id, None, data, as_conflict_version(metadata))?;

    let ids = if is_conflict(&existing.metadata) {
        let mut ids = conflict_ids(&existing.metadata);
        if !ids.contains(&incoming_id) {
            ids.push(incoming_id);
        }
        ids
    } else {
        let existing_id =
            conflict_version_key(key, version_id(&existing.metadata, Some(existing.etag)));
        B::put(
            ctx,
            &existing_id,
            None,
            existing.data,
            as_conflict_version(existing.metadata.clone()),
        )?;
        vec![existing_id, incoming_id]
    };

    let mut record = JsonObject::new();
    record.insert(REPLICATION_CONFLICT.to_string(), Value::Bool(true));
    record.insert(
        CONFLICTS.to_string(),
        Value::Array(ids.iter().cloned().map(Value::String).collect()),
    );
    B::put(ctx, key, Some(existing.etag), B::conflict_body(&ids)?, record)?;

    warn!(
        target: "corvus::replication",
        key,
        source,
        kind = %B::KIND,
        versions = ids.len(),
        "Replication conflict detected"
    );
    Ok(ReplicationOutcome::Conflicted {
        conflicted_version_ids: ids,
    })
}

/// Identifier of a version: its lineage, or its etag for an unstamped item.
fn version_id(metadata: &JsonObject, etag: Option<Etag>) -> Uuid {
    match (Lineage::current(metadata), etag) {
        (Some(lineage), _) => lineage.identifier(),
        (None, Some(etag)) => etag.to_uuid(),
        (None, None) => Uuid::new_v4(),
    }
}

fn as_conflict_version(mut metadata: JsonObject) -> JsonObject {
    metadata.remove(REPLICATION_CONFLICT);
    metadata.insert(REPLICATION_CONFLICT_DOCUMENT.to_string(), Value::Bool(true));
    metadata
}

fn read_source(
    ctx: &mut OperationContext<'_>,
    normalized_source: &str,
) -> CoreResult<SourceReplicationInformation> {
    match ctx.get(&source_key(normalized_source), None)? {
        Some(doc) => Ok(serde_json::from_value(Value::Object(doc.data))?),
        None => Ok(SourceReplicationInformation::default()),
    }
}

fn record_progress(
    ctx: &mut OperationContext<'_>,
    normalized_source: &str,
    instance_id: Uuid,
    stream: Stream,
    last_etag: Etag,
) -> CoreResult<()> {
    let mut info = read_source(ctx, normalized_source)?;
    // A new instance id means the source was recreated and restarted its
    // etags; otherwise a redelivered older batch must not rewind progress.
    let same_instance = info.server_instance_id == instance_id;
    let recorded = match stream {
        Stream::Documents => &mut info.last_document_etag,
        Stream::Attachments => &mut info.last_attachment_etag,
    };
    *recorded = if same_instance {
        (*recorded).max(last_etag)
    } else {
        last_etag
    };
    info.server_instance_id = instance_id;
    let data = match serde_json::to_value(info)? {
        Value::Object(map) => map,
        _ => JsonObject::new(),
    };
    ctx.put(&source_key(normalized_source), None, data, JsonObject::new(), None)?;
    Ok(())
}
