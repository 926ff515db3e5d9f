//! Explicit transactions.
//!
//! Writes tagged with a [`TransactionInformation`] are not applied; they
//! are held as pending writes keyed by document key until the transaction
//! commits, rolls back, or expires.
//!
//! - **Admission**: a key holds at most one pending write. A write to a key
//!   held by another, unexpired transaction fails immediately with a
//!   concurrency error; nothing blocks.
//! - **Expiry**: each write pushes the transaction deadline to `now + timeout`.
//!   Once the deadline passes, the next colliding writer rolls the stale
//!   transaction back and proceeds.
//! - **Visibility**: reads without a transaction never see pending writes;
//!   reads under the owning transaction see them over committed state.
//! - **Recovery**: a pending transaction is marked by a reserved attachment
//!   so it can be discovered after a restart.
//!
//! Admission is per key only. Two transactions holding different keys
//! commit in whatever order their owners call commit.
//!
//! [`TransactionInformation`]: corvus_storage::TransactionInformation

mod buffer;
mod marker;

pub(crate) use buffer::{
    add_document_in_transaction, assert_not_locked, complete_transaction,
    delete_document_in_transaction, document_by_key, modify_transaction_id,
    rollback_transaction,
};
pub(crate) use marker::{delete_recovery_marker, pending_transactions};
pub use marker::recovery_marker_key;
