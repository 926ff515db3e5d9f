//! Recovery markers for pending transactions.

use crate::context::OperationContext;
use crate::error::{CoreError, CoreResult};
use crate::types::RECOVERY_MARKER_PREFIX;
use corvus_storage::{JsonObject, TransactionInformation};
use tracing::warn;
use uuid::Uuid;

/// Returns the attachment key marking transaction `id` as pending.
#[must_use]
pub fn recovery_marker_key(id: Uuid) -> String {
    format!("{RECOVERY_MARKER_PREFIX}{id}")
}

fn encode(tx: &TransactionInformation) -> CoreResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(tx, &mut bytes)
        .map_err(|e| CoreError::serialization(e.to_string()))?;
    Ok(bytes)
}

fn decode(bytes: &[u8]) -> CoreResult<TransactionInformation> {
    ciborium::de::from_reader(bytes).map_err(|e| CoreError::serialization(e.to_string()))
}

/// Writes the marker of a newly pending transaction.
pub(crate) fn write_recovery_marker(
    ctx: &mut OperationContext<'_>,
    tx: &TransactionInformation,
) -> CoreResult<()> {
    let bytes = encode(tx)?;
    let etag = ctx.database().next_etag();
    ctx.actions().attachments().add_attachment(
        &recovery_marker_key(tx.id),
        None,
        etag,
        bytes,
        JsonObject::new(),
    )?;
    Ok(())
}

/// Removes the marker of transaction `id`, if present.
pub(crate) fn delete_recovery_marker(ctx: &mut OperationContext<'_>, id: Uuid) -> CoreResult<()> {
    ctx.actions()
        .attachments()
        .delete_attachment(&recovery_marker_key(id), None)?;
    Ok(())
}

/// Lists the transactions whose markers are still present.
///
/// Markers that cannot be decoded are logged and skipped.
pub(crate) fn pending_transactions(
    ctx: &mut OperationContext<'_>,
) -> CoreResult<Vec<TransactionInformation>> {
    let headers = ctx
        .actions()
        .attachments()
        .attachments_with_prefix(RECOVERY_MARKER_PREFIX)?;
    let mut pending = Vec::with_capacity(headers.len());
    for header in headers {
        let Some(marker) = ctx.actions().attachments().attachment(&header.key)? else {
            continue;
        };
        match decode(&marker.data) {
            Ok(tx) => pending.push(tx),
            Err(err) => warn!(
                target: "corvus::txn",
                key = %header.key,
                error = %err,
                "Skipping unreadable transaction recovery marker"
            ),
        }
    }
    Ok(pending)
}
