//! Replication metadata and lineage helpers.

use corvus_core::JsonObject;
use serde_json::Value;
use uuid::Uuid;

/// Version of the write, from the writer's HiLo generator.
pub const REPLICATION_VERSION: &str = "Corvus-Replication-Version";
/// Storage id of the node that made the write.
pub const REPLICATION_SOURCE: &str = "Corvus-Replication-Source";
/// Version of the item the write replaced.
pub const REPLICATION_PARENT_VERSION: &str = "Corvus-Replication-Parent-Version";
/// Source of the item the write replaced.
pub const REPLICATION_PARENT_SOURCE: &str = "Corvus-Replication-Parent-Source";
/// Marks a conflict record.
pub const REPLICATION_CONFLICT: &str = "Corvus-Replication-Conflict";
/// Marks one competing version stored under a conflict id.
pub const REPLICATION_CONFLICT_DOCUMENT: &str = "Corvus-Replication-Conflict-Document";
/// Marks a tombstone.
pub const DELETE_MARKER: &str = "Corvus-Delete-Marker";
/// Ids of the competing versions of a conflict record.
pub const CONFLICTS: &str = "Conflicts";
/// Documents tracking each remote source live under this prefix.
pub const SOURCES_BASE_PATH: &str = "Corvus/Replication/Sources";

/// The (source, version) pair identifying one write.
#[derive(Debug, Clone, PartialEq)]
pub struct Lineage {
    /// Node that made the write.
    pub source: Value,
    /// Version on that node.
    pub version: Value,
}

impl Lineage {
    /// Reads the lineage of the write itself.
    #[must_use]
    pub fn current(metadata: &JsonObject) -> Option<Self> {
        Self::read(metadata, REPLICATION_SOURCE, REPLICATION_VERSION)
    }

    /// Reads the lineage of the version the write replaced.
    #[must_use]
    pub fn parent(metadata: &JsonObject) -> Option<Self> {
        Self::read(metadata, REPLICATION_PARENT_SOURCE, REPLICATION_PARENT_VERSION)
    }

    fn read(metadata: &JsonObject, source: &str, version: &str) -> Option<Self> {
        let source = metadata.get(source).filter(|v| !v.is_null())?;
        let version = metadata.get(version).filter(|v| !v.is_null())?;
        Some(Self {
            source: source.clone(),
            version: version.clone(),
        })
    }

    /// Writes this lineage as the parent of `metadata`.
    pub fn write_as_parent(&self, metadata: &mut JsonObject) {
        metadata.insert(REPLICATION_PARENT_SOURCE.to_string(), self.source.clone());
        metadata.insert(REPLICATION_PARENT_VERSION.to_string(), self.version.clone());
    }

    /// Stable identifier derived from source and version.
    #[must_use]
    pub fn identifier(&self) -> Uuid {
        let name = format!("{}/{}", plain(&self.source), plain(&self.version));
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
    }
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Removes any parent lineage from `metadata`.
pub fn clear_parent(metadata: &mut JsonObject) {
    metadata.remove(REPLICATION_PARENT_SOURCE);
    metadata.remove(REPLICATION_PARENT_VERSION);
}

fn flag(metadata: &JsonObject, name: &str) -> bool {
    metadata.get(name).and_then(Value::as_bool).unwrap_or(false)
}

/// Returns true for a tombstone.
#[must_use]
pub fn is_tombstone(metadata: &JsonObject) -> bool {
    flag(metadata, DELETE_MARKER)
}

/// Returns true for a conflict record.
#[must_use]
pub fn is_conflict(metadata: &JsonObject) -> bool {
    flag(metadata, REPLICATION_CONFLICT)
}

/// Returns true for a competing version stored under a conflict id.
#[must_use]
pub fn is_conflict_version(metadata: &JsonObject) -> bool {
    flag(metadata, REPLICATION_CONFLICT_DOCUMENT)
}

/// Ids listed by a conflict record.
#[must_use]
pub fn conflict_ids(metadata: &JsonObject) -> Vec<String> {
    metadata
        .get(CONFLICTS)
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Key a competing version of `key` is stored under.
#[must_use]
pub fn conflict_version_key(key: &str, id: Uuid) -> String {
    format!("{key}/conflicts/{id}")
}

/// Returns true if `incoming` was written over exactly the version
/// described by `existing`.
#[must_use]
pub fn is_direct_child(existing: &JsonObject, incoming: &JsonObject) -> bool {
    match (Lineage::current(existing), Lineage::parent(incoming)) {
        (Some(current), Some(parent)) => current == parent,
        _ => false,
    }
}

/// Returns true if both writes came from the same node.
#[must_use]
pub fn same_source(existing: &JsonObject, incoming: &JsonObject) -> bool {
    match (
        existing.get(REPLICATION_SOURCE),
        incoming.get(REPLICATION_SOURCE),
    ) {
        (Some(a), Some(b)) => !a.is_null() && a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata(value: Value) -> JsonObject {
        match value {
            Value::Object(map) => map,
            _ => JsonObject::new(),
        }
    }

    #[test]
    fn direct_child_matches_parent_lineage() {
        let existing = metadata(json!({
            REPLICATION_SOURCE: "a",
            REPLICATION_VERSION: 3,
        }));
        let child = metadata(json!({
            REPLICATION_SOURCE: "b",
            REPLICATION_VERSION: 1,
            REPLICATION_PARENT_SOURCE: "a",
            REPLICATION_PARENT_VERSION: 3,
        }));
        let stranger = metadata(json!({
            REPLICATION_SOURCE: "b",
            REPLICATION_VERSION: 2,
        }));
        assert!(is_direct_child(&existing, &child));
        assert!(!is_direct_child(&existing, &stranger));
        assert!(!is_direct_child(&JsonObject::new(), &child));
    }

    #[test]
    fn identifier_is_stable() {
        let lineage = Lineage {
            source: json!("a"),
            version: json!(7),
        };
        let same = Lineage {
            source: json!("a"),
            version: json!(7),
        };
        let other = Lineage {
            source: json!("b"),
            version: json!(7),
        };
        assert_eq!(lineage.identifier(), same.identifier());
        assert_ne!(lineage.identifier(), other.identifier());
    }

    #[test]
    fn flags_and_conflict_ids() {
        let record = metadata(json!({
            REPLICATION_CONFLICT: true,
            CONFLICTS: ["k/conflicts/1", "k/conflicts/2"],
        }));
        assert!(is_conflict(&record));
        assert!(!is_tombstone(&record));
        assert_eq!(conflict_ids(&record), vec!["k/conflicts/1", "k/conflicts/2"]);
        assert!(is_tombstone(&metadata(json!({DELETE_MARKER: true}))));
        assert!(conflict_ids(&JsonObject::new()).is_empty());
    }

    #[test]
    fn same_source_ignores_missing() {
        let a = metadata(json!({REPLICATION_SOURCE: "a"}));
        assert!(same_source(&a, &a.clone()));
        assert!(!same_source(&a, &JsonObject::new()));
    }

    #[test]
    fn parent_roundtrip() {
        let lineage = Lineage {
            source: json!("a"),
            version: json!(1),
        };
        let mut target = JsonObject::new();
        lineage.write_as_parent(&mut target);
        assert_eq!(Lineage::parent(&target), Some(lineage));
        clear_parent(&mut target);
        assert!(target.is_empty());
    }
}
