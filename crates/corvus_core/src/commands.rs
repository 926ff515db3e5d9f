//! Batch commands and document patching.

use crate::error::{CoreError, CoreResult};
use corvus_storage::{Etag, JsonObject, TransactionInformation};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One field-level patch operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Type")]
pub enum PatchRequest {
    /// Sets a field, replacing any previous value.
    Set {
        /// Field name.
        #[serde(rename = "Name")]
        name: String,
        /// New value.
        #[serde(rename = "Value")]
        value: Value,
    },
    /// Removes a field.
    Unset {
        /// Field name.
        #[serde(rename = "Name")]
        name: String,
    },
    /// Adds to an integer field, creating it if missing.
    Inc {
        /// Field name.
        #[serde(rename = "Name")]
        name: String,
        /// Amount to add.
        #[serde(rename = "Value")]
        value: i64,
    },
}

/// Outcome of a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatchResult {
    /// The document was patched and stored under the given etag.
    Patched {
        /// Etag of the patched version.
        etag: Etag,
    },
    /// There was no document to patch.
    DocumentDoesNotExist,
}

/// Applies patches to a document body in order.
///
/// # Errors
///
/// Returns `InvalidOperation` if `Inc` targets a non-integer field or
/// overflows.
pub fn apply_patches(document: &mut JsonObject, patches: &[PatchRequest]) -> CoreResult<()> {
    for patch in patches {
        match patch {
            PatchRequest::Set { name, value } => {
                document.insert(name.clone(), value.clone());
            }
            PatchRequest::Unset { name } => {
                document.remove(name);
            }
            PatchRequest::Inc { name, value } => {
                let current = match document.get(name) {
                    None | Some(Value::Null) => 0,
                    Some(existing) => existing.as_i64().ok_or_else(|| {
                        CoreError::invalid_operation(format!(
                            "cannot increment field '{name}': it is not an integer"
                        ))
                    })?,
                };
                let next = current.checked_add(*value).ok_or_else(|| {
                    CoreError::invalid_operation(format!("incrementing field '{name}' overflows"))
                })?;
                document.insert(name.clone(), Value::from(next));
            }
        }
    }
    Ok(())
}

/// A command executed by [`crate::Database::batch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// Put a document.
    Put {
        /// Document key.
        key: String,
        /// Expected current etag.
        etag: Option<Etag>,
        /// Document body.
        document: JsonObject,
        /// Document metadata.
        metadata: JsonObject,
        /// Owning transaction, if any.
        transaction: Option<TransactionInformation>,
    },
    /// Delete a document.
    Delete {
        /// Document key.
        key: String,
        /// Expected current etag.
        etag: Option<Etag>,
        /// Owning transaction, if any.
        transaction: Option<TransactionInformation>,
    },
    /// Patch a document.
    Patch {
        /// Document key.
        key: String,
        /// Expected current etag.
        etag: Option<Etag>,
        /// Operations to apply.
        patches: Vec<PatchRequest>,
        /// Owning transaction, if any.
        transaction: Option<TransactionInformation>,
    },
}

impl Command {
    /// Returns the verb of this command.
    #[must_use]
    pub fn method(&self) -> CommandMethod {
        match self {
            Self::Put { .. } => CommandMethod::Put,
            Self::Delete { .. } => CommandMethod::Delete,
            Self::Patch { .. } => CommandMethod::Patch,
        }
    }

    /// Returns the key this command targets.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Put { key, .. } | Self::Delete { key, .. } | Self::Patch { key, .. } => key,
        }
    }
}

/// Verb of a batch command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommandMethod {
    /// Document put.
    Put,
    /// Document delete.
    Delete,
    /// Document patch.
    Patch,
}

/// Result of one batch command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    /// Verb of the command.
    pub method: CommandMethod,
    /// Final key (generated keys are resolved).
    pub key: String,
    /// Etag written by the command, if it wrote a version.
    pub etag: Option<Etag>,
    /// Metadata stored by a put.
    pub metadata: Option<JsonObject>,
    /// Patch outcome, for patch commands.
    pub patch_result: Option<PatchResult>,
    /// Whether a delete removed something.
    pub deleted: Option<bool>,
}
