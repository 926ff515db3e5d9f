//! HiLo replication version generator.

use corvus_core::CoreResult;
use corvus_storage::GeneralStorageActions;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Identity sequence the HiLo blocks are reserved from.
pub const HILO_IDENTITY: &str = "Corvus/Replication/VersionHilo";

#[derive(Debug)]
struct Block {
    current: AtomicI64,
    max: i64,
}

impl Block {
    fn empty() -> Self {
        Self {
            current: AtomicI64::new(0),
            max: 0,
        }
    }
}

/// Amortized, strictly increasing version generator.
///
/// Versions are handed out from an in-memory block of `capacity` values.
/// When the block runs out, the next block is reserved from the durable
/// identity sequence [`HILO_IDENTITY`]: identity value `hi` owns the
/// versions `(hi - 1) * capacity + 1 ..= hi * capacity`.
///
/// # Invariants
///
/// - Versions are strictly increasing for the lifetime of the storage
/// - A reserved block is never handed out twice, even across restarts
/// - The fast path is a single atomic increment
#[derive(Debug)]
pub struct ReplicationHiLo {
    capacity: i64,
    block: RwLock<Arc<Block>>,
    reserve_lock: Mutex<()>,
}

impl ReplicationHiLo {
    /// Creates a generator reserving `capacity` versions per block.
    #[must_use]
    pub fn new(capacity: i64) -> Self {
        Self {
            capacity: capacity.max(1),
            block: RwLock::new(Arc::new(Block::empty())),
            reserve_lock: Mutex::new(()),
        }
    }

    /// Returns the block size.
    #[must_use]
    pub fn capacity(&self) -> i64 {
        self.capacity
    }

    /// Returns the next version.
    ///
    /// `general` is only touched when the current block is exhausted; it
    /// must belong to the batch of the calling operation.
    ///
    /// # Errors
    ///
    /// Returns a storage error if a new block cannot be reserved.
    pub fn next_id(&self, general: &mut dyn GeneralStorageActions) -> CoreResult<i64> {
        loop {
            let block = Arc::clone(&self.block.read());
            let id = block.current.fetch_add(1, Ordering::SeqCst) + 1;
            if id <= block.max {
                return Ok(id);
            }

            let _guard = self.reserve_lock.lock();
            if !Arc::ptr_eq(&block, &self.block.read()) {
                // Another thread reserved a block while we waited.
                continue;
            }
            self.reserve_block(general)?;
        }
    }

    /// Reserves a fresh block, discarding what remains of the current one.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the identity sequence cannot be advanced.
    pub fn seed(&self, general: &mut dyn GeneralStorageActions) -> CoreResult<()> {
        let _guard = self.reserve_lock.lock();
        self.reserve_block(general)
    }

    fn reserve_block(&self, general: &mut dyn GeneralStorageActions) -> CoreResult<()> {
        let hi = general.next_identity_value(HILO_IDENTITY)?;
        let start = (hi - 1).saturating_mul(self.capacity);
        let block = Block {
            current: AtomicI64::new(start),
            max: hi.saturating_mul(self.capacity),
        };
        debug!(
            target: "corvus::replication",
            hi,
            first = start + 1,
            last = block.max,
            "Reserved replication version block"
        );
        *self.block.write() = Arc::new(block);
        Ok(())
    }
}
