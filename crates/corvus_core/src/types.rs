//! Core types shared across modules.

use corvus_storage::{Etag, JsonObject};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix of keys reserved for the database itself.
pub const SYSTEM_KEY_PREFIX: &str = "Corvus/";

/// Identity sequence seeding the etag base of each process.
pub const ETAG_IDENTITY: &str = "Corvus/Etag";

/// Attachment key prefix of pending transaction recovery markers.
pub const RECOVERY_MARKER_PREFIX: &str = "transactions/recoveryInformation/";

/// Metadata block attached to items whose read was denied.
pub const READ_VETO_METADATA: &str = "Corvus-Read-Veto";

/// Metadata entry holding the key of a stored document.
pub const ID_METADATA: &str = "@id";

/// The two kinds of stored items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// JSON document.
    Document,
    /// Binary attachment.
    Attachment,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Document => write!(f, "document"),
            Self::Attachment => write!(f, "attachment"),
        }
    }
}

/// Outcome of a document put.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutResult {
    /// Final key, after generation.
    pub key: String,
    /// Etag assigned to the written version.
    pub etag: Etag,
}

/// Returns true for keys reserved for the database itself.
#[must_use]
pub fn is_system_key(key: &str) -> bool {
    key.starts_with(SYSTEM_KEY_PREFIX)
}

/// Removes every `@`-prefixed property from a caller-supplied object.
pub fn remove_reserved_properties(object: &mut JsonObject) {
    object.retain(|name, _| !name.starts_with('@'));
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn reserved_properties_are_removed() {
        let mut object = JsonObject::new();
        object.insert("@id".into(), json!("users/1"));
        object.insert("@etag".into(), json!("x"));
        object.insert("name".into(), json!("ayende"));
        remove_reserved_properties(&mut object);
        assert_eq!(object.len(), 1);
        assert!(object.contains_key("name"));
    }

    #[test]
    fn system_keys() {
        assert!(is_system_key("Corvus/Replication/Sources/x"));
        assert!(!is_system_key("users/1"));
    }

    proptest! {
        #[test]
        fn no_reserved_property_survives(names in proptest::collection::vec("@?[a-z]{1,6}", 0..12)) {
            let mut object = JsonObject::new();
            for name in &names {
                object.insert(name.clone(), json!(1));
            }
            remove_reserved_properties(&mut object);
            prop_assert!(object.keys().all(|k| !k.starts_with('@')));
            let kept = names.iter().filter(|n| !n.starts_with('@')).collect::<std::collections::HashSet<_>>();
            prop_assert_eq!(object.len(), kept.len());
        }
    }
}
