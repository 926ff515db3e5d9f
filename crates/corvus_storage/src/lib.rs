//! # Corvus Storage
//!
//! Storage contract, shared data model and in-memory engine for CorvusDB.
//!
//! The database core never touches storage directly; it opens a batch
//! through [`TransactionalStorage::begin_batch`] and works through the
//! grouped accessors on [`StorageActions`]. A batch is atomic: commit it,
//! or drop it and nothing it did is visible.
//!
//! ## Design Principles
//!
//! - Engines store documents, attachments, pending transactions, index
//!   tasks and identity sequences
//! - Engines check etags but never generate them
//! - Identity sequences survive rollback
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Engines
//!
//! - [`MemoryStorage`] - For tests and embedded, non-persistent use
//!
//! ## Example
//!
//! ```rust
//! use corvus_storage::{MemoryStorage, StorageActions, TransactionalStorage};
//!
//! let storage = MemoryStorage::new();
//! storage.initialize().unwrap();
//!
//! let mut batch = storage.begin_batch().unwrap();
//! let first = batch.general().next_identity_value("users/").unwrap();
//! assert_eq!(first, 1);
//! batch.commit().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod etag;
mod memory;
mod types;

pub use backend::{
    AttachmentStorageActions, CommitAction, DocumentStorageActions, GeneralStorageActions,
    IndexingStorageActions, StorageActions, TaskStorageActions, TransactionStorageActions,
    TransactionalStorage,
};
pub use error::{StorageError, StorageResult};
pub use etag::Etag;
pub use memory::MemoryStorage;
pub use types::{
    Attachment, AttachmentInformation, DocumentInTransaction, IndexStats, IndexTask, JsonDocument,
    JsonObject, TaskAction, TransactionInformation, TransactionRecord,
};
