//! Replication configuration.

/// Default number of versions reserved per HiLo block.
pub const DEFAULT_HILO_CAPACITY: i64 = 1024;

/// Configuration for the replication triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicationConfig {
    /// Versions reserved from storage per HiLo block.
    pub hilo_capacity: i64,
}

impl ReplicationConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the HiLo block size. Values below 1 are raised to 1.
    #[must_use]
    pub const fn hilo_capacity(mut self, capacity: i64) -> Self {
        self.hilo_capacity = if capacity < 1 { 1 } else { capacity };
        self
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            hilo_capacity: DEFAULT_HILO_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        assert_eq!(ReplicationConfig::new().hilo_capacity, 1024);
    }

    #[test]
    fn capacity_is_at_least_one() {
        assert_eq!(ReplicationConfig::new().hilo_capacity(0).hilo_capacity, 1);
        assert_eq!(ReplicationConfig::new().hilo_capacity(32).hilo_capacity, 32);
    }
}
