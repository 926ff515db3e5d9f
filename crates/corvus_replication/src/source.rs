//! Per-source replication progress.

use crate::error::{ReplicationError, ReplicationResult};
use crate::lineage::SOURCES_BASE_PATH;
use corvus_core::Etag;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// What this node has received from one remote source.
///
/// Stored as an ordinary document under [`source_key`]. The zero record
/// (`Default`) describes a source never seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SourceReplicationInformation {
    /// Remote etag of the last document received.
    pub last_document_etag: Etag,
    /// Remote etag of the last attachment received.
    pub last_attachment_etag: Etag,
    /// Storage id of the remote node.
    pub server_instance_id: Uuid,
}

impl fmt::Display for SourceReplicationInformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LastDocumentEtag: {}, LastAttachmentEtag: {}, ServerInstanceId: {}",
            self.last_document_etag, self.last_attachment_etag, self.server_instance_id
        )
    }
}

/// Strips trailing `/` from a source identifier.
///
/// # Errors
///
/// Returns `InvalidSource` if nothing is left.
pub fn normalize_source(source: &str) -> ReplicationResult<&str> {
    let normalized = source.trim_end_matches('/');
    if normalized.is_empty() {
        return Err(ReplicationError::InvalidSource {
            source_url: source.to_string(),
        });
    }
    Ok(normalized)
}

/// Key of the document tracking `source`, which must be normalized.
#[must_use]
pub fn source_key(normalized_source: &str) -> String {
    format!("{SOURCES_BASE_PATH}/{normalized_source}")
}
