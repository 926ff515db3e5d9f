//! Etag generation.

use corvus_storage::Etag;
use std::sync::atomic::{AtomicI64, Ordering};

/// Hands out strictly increasing etags for one process lifetime.
///
/// The base half is fixed when the database opens (drawn from a durable
/// identity sequence, so it differs between restarts); the counter half
/// is an atomic increment.
#[derive(Debug)]
pub struct EtagGenerator {
    base: i64,
    counter: AtomicI64,
}

impl EtagGenerator {
    /// Creates a generator with the given base.
    #[must_use]
    pub fn new(base: i64) -> Self {
        Self {
            base,
            counter: AtomicI64::new(0),
        }
    }

    /// Returns the base of this process.
    #[must_use]
    pub fn base(&self) -> i64 {
        self.base
    }

    /// Returns the next etag.
    pub fn next(&self) -> Etag {
        let counter = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Etag::from_parts(self.base, counter)
    }
}
