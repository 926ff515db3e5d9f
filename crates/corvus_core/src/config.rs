//! Database configuration.

use std::time::Duration;

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Documents handed to the indexing engine per background pass.
    pub background_batch_size: usize,

    /// Upper bound for document and attachment listings.
    pub max_page_size: usize,

    /// How long the background worker sleeps when there is no work.
    pub work_wait_timeout: Duration,

    /// Failure rate above which an index is disabled.
    pub index_failure_threshold: f64,

    /// Attempts an index must see before it can be disabled.
    pub index_min_attempts_before_disable: u64,

    /// Attempts for internal housekeeping that races with the worker.
    pub housekeeping_retries: u32,

    /// Pause between housekeeping attempts.
    pub housekeeping_backoff: Duration,

    /// Indexing errors kept for diagnostics.
    pub max_retained_errors: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            background_batch_size: 128,
            max_page_size: 1024,
            work_wait_timeout: Duration::from_secs(5 * 60),
            index_failure_threshold: 0.15,
            index_min_attempts_before_disable: 100,
            housekeeping_retries: 10,
            housekeeping_backoff: Duration::from_millis(100),
            max_retained_errors: 50,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the background indexing batch size.
    #[must_use]
    pub const fn background_batch_size(mut self, size: usize) -> Self {
        self.background_batch_size = size;
        self
    }

    /// Sets the listing page cap.
    #[must_use]
    pub const fn max_page_size(mut self, size: usize) -> Self {
        self.max_page_size = size;
        self
    }

    /// Sets the idle wait of the background worker.
    #[must_use]
    pub const fn work_wait_timeout(mut self, timeout: Duration) -> Self {
        self.work_wait_timeout = timeout;
        self
    }

    /// Sets the failure rate above which an index is disabled.
    #[must_use]
    pub const fn index_failure_threshold(mut self, threshold: f64) -> Self {
        self.index_failure_threshold = threshold;
        self
    }

    /// Sets the attempts required before an index can be disabled.
    #[must_use]
    pub const fn index_min_attempts_before_disable(mut self, attempts: u64) -> Self {
        self.index_min_attempts_before_disable = attempts;
        self
    }

    /// Sets the housekeeping retry budget.
    #[must_use]
    pub const fn housekeeping_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.housekeeping_retries = retries;
        self.housekeeping_backoff = backoff;
        self
    }

    /// Sets how many indexing errors are retained.
    #[must_use]
    pub const fn max_retained_errors(mut self, count: usize) -> Self {
        self.max_retained_errors = count;
        self
    }
}
