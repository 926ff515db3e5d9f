//! Pending-write overlay.

use super::marker::{delete_recovery_marker, write_recovery_marker};
use crate::context::OperationContext;
use crate::error::{CoreError, CoreResult};
use corvus_storage::{
    DocumentInTransaction, Etag, JsonDocument, JsonObject, TransactionInformation,
    TransactionRecord,
};
use std::time::SystemTime;
use tracing::{debug, info};
use uuid::Uuid;

/// Fails if `key` is held by a transaction other than `tx` that has not
/// expired. A held key whose transaction has expired is released by
/// rolling that transaction back.
///
/// # Errors
///
/// Returns `Concurrency` if the key is locked.
pub(crate) fn assert_not_locked(
    ctx: &mut OperationContext<'_>,
    key: &str,
    tx: Option<&TransactionInformation>,
    now: SystemTime,
) -> CoreResult<()> {
    let Some(pending) = ctx.actions().transactions().document_in_transaction(key)? else {
        return Ok(());
    };
    if tx.map(|tx| tx.id) == Some(pending.tx_id) {
        return Ok(());
    }
    match ctx.actions().transactions().transaction(pending.tx_id)? {
        Some(record) if !record.is_expired(now) => Err(CoreError::concurrency(format!(
            "Document '{key}' is locked by transaction: {}",
            pending.tx_id
        ))),
        _ => {
            info!(
                target: "corvus::txn",
                tx_id = %pending.tx_id,
                key,
                "Superseding expired transaction"
            );
            rollback_transaction(ctx, pending.tx_id)?;
            Ok(())
        }
    }
}

/// Checks `expected` against the version `tx` currently sees.
fn check_etag(
    ctx: &mut OperationContext<'_>,
    operation: &str,
    key: &str,
    expected: Option<Etag>,
) -> CoreResult<()> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let current = match ctx.actions().transactions().document_in_transaction(key)? {
        Some(pending) if pending.delete => None,
        Some(pending) => Some(pending.etag),
        None => ctx
            .actions()
            .documents()
            .document_by_key(key)?
            .map(|doc| doc.etag),
    };
    match current {
        Some(current) if current != expected => Err(CoreError::etag_mismatch(
            format!("{operation} attempted on '{key}' using a non current etag"),
            expected,
            current,
        )),
        _ => Ok(()),
    }
}

/// Creates or extends the pending record of `tx`.
fn touch_transaction(
    ctx: &mut OperationContext<'_>,
    tx: &TransactionInformation,
    now: SystemTime,
) -> CoreResult<()> {
    let existing = ctx.actions().transactions().transaction(tx.id)?;
    ctx.actions().transactions().put_transaction(TransactionRecord {
        id: tx.id,
        expires_at: tx.expires_at(now),
    })?;
    if existing.is_none() {
        write_recovery_marker(ctx, tx)?;
        debug!(target: "corvus::txn", tx_id = %tx.id, "Transaction started");
    }
    Ok(())
}

/// Holds a document put pending under `tx`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn add_document_in_transaction(
    ctx: &mut OperationContext<'_>,
    key: &str,
    expected: Option<Etag>,
    new_etag: Etag,
    data: JsonObject,
    metadata: JsonObject,
    tx: &TransactionInformation,
    now: SystemTime,
) -> CoreResult<()> {
    assert_not_locked(ctx, key, Some(tx), now)?;
    check_etag(ctx, "PUT", key, expected)?;
    touch_transaction(ctx, tx, now)?;
    ctx.actions()
        .transactions()
        .put_document_in_transaction(DocumentInTransaction {
            key: key.to_string(),
            tx_id: tx.id,
            data,
            metadata,
            etag: new_etag,
            delete: false,
        })?;
    Ok(())
}

/// Holds a document delete pending under `tx`.
///
/// Returns whether the document was visible to `tx` before the delete.
pub(crate) fn delete_document_in_transaction(
    ctx: &mut OperationContext<'_>,
    key: &str,
    expected: Option<Etag>,
    new_etag: Etag,
    tx: &TransactionInformation,
    now: SystemTime,
) -> CoreResult<bool> {
    assert_not_locked(ctx, key, Some(tx), now)?;
    check_etag(ctx, "DELETE", key, expected)?;
    let existed = document_by_key(ctx, key, Some(tx), now)?.is_some();
    touch_transaction(ctx, tx, now)?;
    ctx.actions()
        .transactions()
        .put_document_in_transaction(DocumentInTransaction {
            key: key.to_string(),
            tx_id: tx.id,
            data: JsonObject::new(),
            metadata: JsonObject::new(),
            etag: new_etag,
            delete: true,
        })?;
    Ok(existed)
}

/// Reads `key` as `tx` sees it: its own pending write if any, else the
/// committed document.
pub(crate) fn document_by_key(
    ctx: &mut OperationContext<'_>,
    key: &str,
    tx: Option<&TransactionInformation>,
    now: SystemTime,
) -> CoreResult<Option<JsonDocument>> {
    if let Some(tx) = tx {
        if let Some(pending) = ctx.actions().transactions().document_in_transaction(key)? {
            if pending.tx_id == tx.id {
                if pending.delete {
                    return Ok(None);
                }
                return Ok(Some(JsonDocument {
                    key: pending.key,
                    data: pending.data,
                    metadata: pending.metadata,
                    etag: pending.etag,
                    last_modified: now,
                }));
            }
        }
    }
    Ok(ctx.actions().documents().document_by_key(key)?)
}

/// Removes the pending state of `id` and returns its writes, in the order
/// they were made, for replay.
pub(crate) fn complete_transaction(
    ctx: &mut OperationContext<'_>,
    id: Uuid,
) -> CoreResult<Vec<DocumentInTransaction>> {
    let writes = ctx.actions().transactions().documents_in_transaction(id)?;
    for write in &writes {
        ctx.actions()
            .transactions()
            .remove_document_in_transaction(&write.key)?;
    }
    ctx.actions().transactions().remove_transaction(id)?;
    Ok(writes)
}

/// Discards every pending write of `id` and its recovery marker.
///
/// Returns whether anything was pending.
pub(crate) fn rollback_transaction(ctx: &mut OperationContext<'_>, id: Uuid) -> CoreResult<bool> {
    let writes = complete_transaction(ctx, id)?;
    let existed = !writes.is_empty();
    delete_recovery_marker(ctx, id)?;
    Ok(existed)
}

/// Re-tags the pending writes of `from` as belonging to `to`.
///
/// # Errors
///
/// Returns `InvalidOperation` if `from` has no pending state.
pub(crate) fn modify_transaction_id(
    ctx: &mut OperationContext<'_>,
    from: Uuid,
    to: &TransactionInformation,
    now: SystemTime,
) -> CoreResult<()> {
    let record = ctx.actions().transactions().transaction(from)?;
    let writes = ctx.actions().transactions().documents_in_transaction(from)?;
    if record.is_none() && writes.is_empty() {
        return Err(CoreError::invalid_operation(format!(
            "there is no pending transaction {from}"
        )));
    }
    for write in writes {
        ctx.actions()
            .transactions()
            .put_document_in_transaction(DocumentInTransaction {
                tx_id: to.id,
                ..write
            })?;
    }
    ctx.actions().transactions().remove_transaction(from)?;
    delete_recovery_marker(ctx, from)?;
    touch_transaction(ctx, to, now)?;
    debug!(target: "corvus::txn", from = %from, to = %to.id, "Transaction id modified");
    Ok(())
}
