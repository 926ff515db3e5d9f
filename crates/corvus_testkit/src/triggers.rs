//! Sample triggers shared by scenario tests.

use corvus_core::{
    CoreResult, DeleteCommitNotifier, DeleteVeto, Etag, JsonObject, OperationContext,
    PutCommitNotifier, PutMutator, PutVeto, ReadOperation, ReadTrigger, ReadVetoResult,
    TransactionInformation, VetoResult,
};
use parking_lot::Mutex;
use serde_json::Value;

/// Refuses attachments larger than a byte limit.
#[derive(Debug, Clone, Copy)]
pub struct RefuseBigAttachmentPutTrigger {
    max_size: usize,
}

impl RefuseBigAttachmentPutTrigger {
    /// Refuses attachments of more than `max_size` bytes.
    pub fn new(max_size: usize) -> Self {
        Self { max_size }
    }
}

impl PutVeto<Vec<u8>> for RefuseBigAttachmentPutTrigger {
    fn allow_put(
        &self,
        _ctx: &OperationContext<'_>,
        _key: &str,
        body: &Vec<u8>,
        _metadata: &JsonObject,
        _tx: Option<&TransactionInformation>,
    ) -> CoreResult<VetoResult> {
        if body.len() > self.max_size {
            return Ok(VetoResult::deny("Attachment is too big"));
        }
        Ok(VetoResult::Allowed)
    }
}

/// Refuses deletes of keys under a prefix.
#[derive(Debug, Clone)]
pub struct RefuseDeleteTrigger {
    prefix: String,
}

impl RefuseDeleteTrigger {
    /// Protects every key starting with `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl DeleteVeto for RefuseDeleteTrigger {
    fn allow_delete(
        &self,
        _ctx: &OperationContext<'_>,
        key: &str,
        _tx: Option<&TransactionInformation>,
    ) -> CoreResult<VetoResult> {
        if key.starts_with(&self.prefix) {
            return Ok(VetoResult::deny(format!("Cannot delete {}", self.prefix)));
        }
        Ok(VetoResult::Allowed)
    }
}

/// Upper-cases the `name` property of every document.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpperCaseNamesTrigger;

impl PutMutator<JsonObject> for UpperCaseNamesTrigger {
    fn on_put(
        &self,
        _ctx: &mut OperationContext<'_>,
        _key: &str,
        body: &mut JsonObject,
        _metadata: &mut JsonObject,
        _tx: Option<&TransactionInformation>,
    ) -> CoreResult<()> {
        if let Some(Value::String(name)) = body.get_mut("name") {
            *name = name.to_uppercase();
        }
        Ok(())
    }
}

/// Hides documents flagged `Hidden` and denies those flagged `Confidential`.
#[derive(Debug, Clone, Copy, Default)]
pub struct VisibilityReadTrigger;

impl ReadTrigger<JsonObject> for VisibilityReadTrigger {
    fn allow_read(
        &self,
        _key: &str,
        _body: &JsonObject,
        metadata: &JsonObject,
        operation: ReadOperation,
    ) -> CoreResult<ReadVetoResult> {
        if metadata.get("Hidden") == Some(&Value::Bool(true)) {
            return Ok(ReadVetoResult::Ignore);
        }
        if operation == ReadOperation::Load
            && metadata.get("Confidential") == Some(&Value::Bool(true))
        {
            return Ok(ReadVetoResult::deny("Confidential"));
        }
        Ok(ReadVetoResult::Allowed)
    }

    fn name(&self) -> &str {
        "VisibilityReadTrigger"
    }
}

/// Records every key whose write became durable.
#[derive(Debug, Default)]
pub struct RecordingCommitNotifier {
    puts: Mutex<Vec<(String, Etag)>>,
    deletes: Mutex<Vec<String>>,
}

impl RecordingCommitNotifier {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys and etags of committed puts, in commit order.
    pub fn puts(&self) -> Vec<(String, Etag)> {
        self.puts.lock().clone()
    }

    /// Keys of committed deletes, in commit order.
    pub fn deletes(&self) -> Vec<String> {
        self.deletes.lock().clone()
    }
}

impl PutCommitNotifier<JsonObject> for RecordingCommitNotifier {
    fn after_commit(
        &self,
        key: &str,
        _body: &JsonObject,
        _metadata: &JsonObject,
        etag: Etag,
    ) -> CoreResult<()> {
        self.puts.lock().push((key.to_string(), etag));
        Ok(())
    }
}

impl DeleteCommitNotifier for RecordingCommitNotifier {
    fn after_commit(&self, key: &str) -> CoreResult<()> {
        self.deletes.lock().push(key.to_string());
        Ok(())
    }
}
