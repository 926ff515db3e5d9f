//! # Corvus Replication
//!
//! Master-master replication support for CorvusDB.
//!
//! This crate provides:
//! - A HiLo generator for replication versions
//! - Triggers stamping every local write with version, source and parent lineage
//! - Tombstones in place of physical deletes
//! - Conflict detection and conflict records for divergent inbound writes
//! - Per-source tracking of the last etag received
//!
//! Transport is out of scope: an external replicator pulls from peers and
//! feeds [`ReplicationReceiver`].
//!
//! ## Example
//!
//! ```rust
//! use corvus_core::{Config, Database, MemoryStorage, Triggers};
//! use corvus_replication::{Replication, ReplicationConfig, REPLICATION_VERSION};
//! use std::sync::Arc;
//!
//! let mut builder = Triggers::builder();
//! Replication::register(&mut builder, ReplicationConfig::default());
//! let db = Database::open_with(
//!     Arc::new(MemoryStorage::new()),
//!     Config::default(),
//!     builder.build(),
//! )
//! .unwrap();
//!
//! db.put("users/1", None, Default::default(), Default::default(), None).unwrap();
//! let doc = db.get("users/1", None).unwrap().unwrap();
//! assert!(doc.metadata.contains_key(REPLICATION_VERSION));
//! ```
//!
//! ## Key Invariants
//!
//! - Writes applied by the receiver are never re-stamped
//! - A replicated delete leaves a tombstone carrying the deleted lineage
//! - A conflicted key cannot be loaded until it is overwritten directly

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod entity;
mod error;
mod hilo;
mod lineage;
mod receiver;
mod source;
mod triggers;

pub use config::{ReplicationConfig, DEFAULT_HILO_CAPACITY};
pub use entity::{ReplicatedEntity, StoredItem};
pub use error::{ReplicationError, ReplicationResult};
pub use hilo::{ReplicationHiLo, HILO_IDENTITY};
pub use lineage::{
    conflict_ids, conflict_version_key, is_conflict, is_conflict_version, is_direct_child,
    is_tombstone, Lineage, CONFLICTS, DELETE_MARKER, REPLICATION_CONFLICT,
    REPLICATION_CONFLICT_DOCUMENT, REPLICATION_PARENT_SOURCE, REPLICATION_PARENT_VERSION,
    REPLICATION_SOURCE, REPLICATION_VERSION, SOURCES_BASE_PATH,
};
pub use receiver::{
    ReplicatedAttachment, ReplicatedDelete, ReplicatedDocument, ReplicationOutcome,
    ReplicationReceiver,
};
pub use source::{normalize_source, source_key, SourceReplicationInformation};
pub use triggers::{
    AncestryTrigger, HiLoInitializer, RemoveConflictTrigger, ReplicationReadTrigger,
    VirtualDeleteTrigger,
};

use corvus_core::{EntityTriggers, JsonObject, TriggersBuilder};
use std::sync::Arc;

/// Handle to the replication triggers installed on a database.
#[derive(Debug, Clone)]
pub struct Replication {
    hilo: Arc<ReplicationHiLo>,
}

impl Replication {
    /// Installs the replication triggers for documents and attachments.
    pub fn register(builder: &mut TriggersBuilder, config: ReplicationConfig) -> Self {
        let hilo = Arc::new(ReplicationHiLo::new(config.hilo_capacity));
        install::<JsonObject>(builder.documents(), &hilo);
        install::<Vec<u8>>(builder.attachments(), &hilo);
        builder.initializer(Arc::new(HiLoInitializer::new(Arc::clone(&hilo))));
        Self { hilo }
    }

    /// The version generator shared by the triggers.
    #[must_use]
    pub fn hilo(&self) -> &Arc<ReplicationHiLo> {
        &self.hilo
    }
}

fn install<B: ReplicatedEntity>(triggers: &mut EntityTriggers<B>, hilo: &Arc<ReplicationHiLo>) {
    let remove_conflict = Arc::new(RemoveConflictTrigger::<B>::new());
    let virtual_delete = Arc::new(VirtualDeleteTrigger::<B>::new());
    triggers
        .put_mutator(remove_conflict.clone())
        .put_mutator(Arc::new(AncestryTrigger::<B>::new(Arc::clone(hilo))))
        .delete_mutator(remove_conflict)
        .delete_mutator(virtual_delete.clone())
        .delete_notifier(virtual_delete)
        .read(Arc::new(ReplicationReadTrigger::<B>::new()));
}
