//! # Corvus Core
//!
//! Embeddable document database core for CorvusDB.
//!
//! This crate provides:
//! - Etag-based optimistic concurrency for documents and attachments
//! - Explicit transactions with a timeout-bounded write buffer
//! - A trigger pipeline (vetoes, mutators, notifiers, read filters)
//! - Batched commands and field-level patching
//! - An index registry fed by a background worker
//!
//! Storage is pluggable through [`corvus_storage::TransactionalStorage`].
//!
//! ## Example
//!
//! ```rust
//! use corvus_core::{Database, TransactionInformation};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! let db = Database::open_in_memory().unwrap();
//! let tx = TransactionInformation::new(Duration::from_secs(60));
//!
//! let data = json!({"total": 42}).as_object().cloned().unwrap();
//! db.put("orders/1", None, data, Default::default(), Some(&tx)).unwrap();
//! assert!(db.get("orders/1", None).unwrap().is_none());
//!
//! db.commit(tx.id).unwrap();
//! assert!(db.get("orders/1", None).unwrap().is_some());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod commands;
mod config;
mod context;
mod database;
mod error;
mod etag;
mod indexing;
mod stats;
mod transaction;
pub mod trigger;
mod types;
mod work;

pub use commands::{apply_patches, BatchResult, Command, CommandMethod, PatchRequest, PatchResult};
pub use config::Config;
pub use context::OperationContext;
pub use database::Database;
pub use error::{CoreError, CoreResult};
pub use etag::EtagGenerator;
pub use indexing::{IndexFailureInformation, IndexingEngine, IndexingFailure};
pub use stats::DatabaseStatistics;
pub use transaction::recovery_marker_key;
pub use trigger::{
    DatabaseInitializer, DeleteCommitNotifier, DeleteMutator, DeleteNotifier, DeleteVeto,
    EntityTriggers, PutCommitNotifier, PutMutator, PutNotifier, PutVeto, ReadOperation,
    ReadTrigger, ReadVetoResult, TriggerDescription, Triggers, TriggersBuilder, VetoResult,
};
pub use types::{
    is_system_key, remove_reserved_properties, EntityKind, PutResult, ETAG_IDENTITY, ID_METADATA,
    READ_VETO_METADATA, RECOVERY_MARKER_PREFIX, SYSTEM_KEY_PREFIX,
};
pub use work::{IndexingError, WorkContext};

pub use corvus_storage::{
    Attachment, AttachmentInformation, Etag, JsonDocument, JsonObject, MemoryStorage,
    StorageError, StorageActions, TransactionInformation, TransactionalStorage,
};
