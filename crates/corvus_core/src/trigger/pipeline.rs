//! Trigger evaluation.

use super::registry::EntityTriggers;
use super::{ReadOperation, ReadVetoResult, VetoResult};
use crate::context::OperationContext;
use crate::error::{CoreError, CoreResult};
use crate::types::READ_VETO_METADATA;
use corvus_storage::{Etag, JsonObject, TransactionInformation};
use serde_json::json;
use tracing::warn;

/// Fails with `Vetoed` at the first put veto that refuses.
pub(crate) fn assert_put_allowed<B>(
    ctx: &OperationContext<'_>,
    triggers: &EntityTriggers<B>,
    key: &str,
    body: &B,
    metadata: &JsonObject,
    tx: Option<&TransactionInformation>,
) -> CoreResult<()> {
    for trigger in &triggers.put_vetoes {
        if let VetoResult::Denied(reason) = trigger.allow_put(ctx, key, body, metadata, tx)? {
            return Err(CoreError::vetoed("PUT", trigger.name(), reason));
        }
    }
    Ok(())
}

/// Fails with `Vetoed` at the first delete veto that refuses.
pub(crate) fn assert_delete_allowed<B>(
    ctx: &OperationContext<'_>,
    triggers: &EntityTriggers<B>,
    key: &str,
    tx: Option<&TransactionInformation>,
) -> CoreResult<()> {
    for trigger in &triggers.delete_vetoes {
        if let VetoResult::Denied(reason) = trigger.allow_delete(ctx, key, tx)? {
            return Err(CoreError::vetoed("DELETE", trigger.name(), reason));
        }
    }
    Ok(())
}

/// Defers the after-commit put notifiers until the batch is durable.
pub(crate) fn schedule_put_commit<B>(
    ctx: &mut OperationContext<'_>,
    triggers: &EntityTriggers<B>,
    key: &str,
    body: &B,
    metadata: &JsonObject,
    etag: Etag,
) where
    B: Clone + Send + 'static,
{
    if triggers.put_commit_notifiers.is_empty() {
        return;
    }
    let notifiers = triggers.put_commit_notifiers.clone();
    let key = key.to_string();
    let body = body.clone();
    let metadata = metadata.clone();
    ctx.actions().on_commit(Box::new(move || {
        for trigger in &notifiers {
            if let Err(err) = trigger.after_commit(&key, &body, &metadata, etag) {
                warn!(
                    target: "corvus::triggers",
                    trigger = trigger.name(),
                    key = %key,
                    error = %err,
                    "After-commit put trigger failed"
                );
            }
        }
    }));
}

/// Defers the after-commit delete notifiers until the batch is durable.
pub(crate) fn schedule_delete_commit<B>(
    ctx: &mut OperationContext<'_>,
    triggers: &EntityTriggers<B>,
    key: &str,
) {
    if triggers.delete_commit_notifiers.is_empty() {
        return;
    }
    let notifiers = triggers.delete_commit_notifiers.clone();
    let key = key.to_string();
    ctx.actions().on_commit(Box::new(move || {
        for trigger in &notifiers {
            if let Err(err) = trigger.after_commit(&key) {
                warn!(
                    target: "corvus::triggers",
                    trigger = trigger.name(),
                    key = %key,
                    error = %err,
                    "After-commit delete trigger failed"
                );
            }
        }
    }));
}

/// Runs read vetoes, then read transforms, over a stored item.
///
/// Returns `None` if a trigger hides the item. A denying trigger blanks
/// the body and replaces the metadata with a read-veto block; later vetoes
/// are not consulted.
pub(crate) fn apply_read_triggers<B: Default>(
    triggers: &EntityTriggers<B>,
    key: &str,
    mut body: B,
    mut metadata: JsonObject,
    operation: ReadOperation,
) -> CoreResult<Option<(B, JsonObject)>> {
    for trigger in &triggers.readers {
        match trigger.allow_read(key, &body, &metadata, operation)? {
            ReadVetoResult::Allowed => {}
            ReadVetoResult::Deny(reason) => {
                body = B::default();
                metadata = read_veto_metadata(&reason, trigger.name());
                break;
            }
            ReadVetoResult::Ignore => return Ok(None),
        }
    }
    for trigger in &triggers.readers {
        trigger.on_read(key, &mut body, &mut metadata, operation);
    }
    Ok(Some((body, metadata)))
}

/// Returns false if a load of the item would be ignored, which is how
/// items that are stored but logically gone (such as tombstones) read.
/// Conflicted and denied items still exist.
pub(crate) fn is_readable<B>(
    triggers: &EntityTriggers<B>,
    key: &str,
    body: &B,
    metadata: &JsonObject,
) -> CoreResult<bool> {
    for trigger in &triggers.readers {
        match trigger.allow_read(key, body, metadata, ReadOperation::Load) {
            Ok(ReadVetoResult::Ignore) => return Ok(false),
            Ok(ReadVetoResult::Allowed) => {}
            Ok(ReadVetoResult::Deny(_)) | Err(CoreError::Conflict { .. }) => return Ok(true),
            Err(err) => return Err(err),
        }
    }
    Ok(true)
}

fn read_veto_metadata(reason: &str, trigger: &str) -> JsonObject {
    let mut metadata = JsonObject::new();
    metadata.insert(
        READ_VETO_METADATA.to_string(),
        json!({ "Reason": reason, "Trigger": trigger }),
    );
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::ReadTrigger;
    use serde_json::Value;
    use std::sync::Arc;

    struct Veto(ReadVetoResult);

    impl ReadTrigger<Vec<u8>> for Veto {
        fn allow_read(
            &self,
            _key: &str,
            _body: &Vec<u8>,
            _metadata: &JsonObject,
            _operation: ReadOperation,
        ) -> CoreResult<ReadVetoResult> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &str {
            "veto"
        }
    }

    struct Upper;

    impl ReadTrigger<Vec<u8>> for Upper {
        fn on_read(
            &self,
            _key: &str,
            body: &mut Vec<u8>,
            _metadata: &mut JsonObject,
            _operation: ReadOperation,
        ) {
            body.make_ascii_uppercase();
        }
    }

    #[test]
    fn allowed_item_is_transformed() {
        let mut triggers: EntityTriggers<Vec<u8>> = EntityTriggers::default();
        triggers
            .read(Arc::new(Veto(ReadVetoResult::Allowed)))
            .read(Arc::new(Upper));
        let (body, _) = apply_read_triggers(
            &triggers,
            "k",
            b"abc".to_vec(),
            JsonObject::new(),
            ReadOperation::Load,
        )
        .unwrap()
        .unwrap();
        assert_eq!(body, b"ABC");
    }

    #[test]
    fn denied_item_is_blanked() {
        let mut triggers: EntityTriggers<Vec<u8>> = EntityTriggers::default();
        triggers
            .read(Arc::new(Veto(ReadVetoResult::deny("secret"))))
            .read(Arc::new(Veto(ReadVetoResult::Ignore)));
        let mut metadata = JsonObject::new();
        metadata.insert("Owner".into(), json!("oren"));
        let (body, metadata) =
            apply_read_triggers(&triggers, "k", b"abc".to_vec(), metadata, ReadOperation::Load)
                .unwrap()
                .unwrap();
        assert!(body.is_empty());
        assert_eq!(
            metadata.get(READ_VETO_METADATA),
            Some(&json!({ "Reason": "secret", "Trigger": "veto" }))
        );
        assert!(!metadata.contains_key("Owner"));
    }

    #[test]
    fn ignored_item_is_hidden() {
        let mut triggers: EntityTriggers<Vec<u8>> = EntityTriggers::default();
        triggers.read(Arc::new(Veto(ReadVetoResult::Ignore)));
        let result = apply_read_triggers(
            &triggers,
            "k",
            b"abc".to_vec(),
            JsonObject::new(),
            ReadOperation::Query,
        )
        .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn ignored_item_is_not_readable() {
        let mut triggers: EntityTriggers<Vec<u8>> = EntityTriggers::default();
        assert!(is_readable(&triggers, "k", &Vec::new(), &JsonObject::new()).unwrap());
        triggers
            .read(Arc::new(Veto(ReadVetoResult::Allowed)))
            .read(Arc::new(Veto(ReadVetoResult::Ignore)));
        assert!(!is_readable(&triggers, "k", &Vec::new(), &JsonObject::new()).unwrap());

        let mut denied: EntityTriggers<Vec<u8>> = EntityTriggers::default();
        denied
            .read(Arc::new(Veto(ReadVetoResult::deny("secret"))))
            .read(Arc::new(Veto(ReadVetoResult::Ignore)));
        assert!(is_readable(&denied, "k", &Vec::new(), &JsonObject::new()).unwrap());
    }

    #[test]
    fn read_veto_block_shape() {
        let metadata = read_veto_metadata("r", "t");
        assert!(matches!(metadata.get(READ_VETO_METADATA), Some(Value::Object(_))));
    }
}
