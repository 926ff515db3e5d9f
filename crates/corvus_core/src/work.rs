//! Work signalling between writers and the background worker.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

/// A failure reported by the indexing engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexingError {
    /// Index that failed.
    pub index: String,
    /// Document key, if the failure concerns one document.
    pub key: Option<String>,
    /// Engine message.
    pub message: String,
    /// When the failure was recorded.
    pub timestamp: SystemTime,
}

#[derive(Debug, Default)]
struct WorkState {
    pending: bool,
}

/// Shared signal waking the background worker after mutations.
///
/// Writers call [`WorkContext::notify_about_work`]; the worker sleeps in
/// [`WorkContext::wait_for_work`]. A notification that arrives while the
/// worker is busy is kept, so the next wait returns immediately.
#[derive(Debug)]
pub struct WorkContext {
    state: Mutex<WorkState>,
    work_ready: Condvar,
    running: AtomicBool,
    errors: Mutex<VecDeque<IndexingError>>,
    max_errors: usize,
}

impl WorkContext {
    /// Creates a stopped work context retaining up to `max_errors` errors.
    #[must_use]
    pub fn new(max_errors: usize) -> Self {
        Self {
            state: Mutex::new(WorkState::default()),
            work_ready: Condvar::new(),
            running: AtomicBool::new(false),
            errors: Mutex::new(VecDeque::new()),
            max_errors,
        }
    }

    /// Marks the context as running.
    pub fn start_work(&self) {
        self.running.store(true, Ordering::Release);
    }

    /// Stops the context and wakes every waiter.
    pub fn stop_work(&self) {
        self.running.store(false, Ordering::Release);
        // Notify under the lock so a worker between its check and its wait
        // cannot miss the wakeup.
        let _state = self.state.lock();
        self.work_ready.notify_all();
    }

    /// Returns true between `start_work` and `stop_work`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Signals that there may be new work.
    pub fn notify_about_work(&self) {
        let mut state = self.state.lock();
        state.pending = true;
        self.work_ready.notify_all();
    }

    /// Waits until work is signalled, the context stops, or `timeout` passes.
    ///
    /// Returns true if work was signalled.
    pub fn wait_for_work(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if !state.pending && self.is_running() {
            let _ = self.work_ready.wait_for(&mut state, timeout);
        }
        std::mem::take(&mut state.pending)
    }

    /// Records an indexing failure, dropping the oldest beyond the limit.
    pub fn add_error(&self, error: IndexingError) {
        let mut errors = self.errors.lock();
        errors.push_back(error);
        while errors.len() > self.max_errors {
            errors.pop_front();
        }
    }

    /// Returns the retained indexing failures, oldest first.
    #[must_use]
    pub fn errors(&self) -> Vec<IndexingError> {
        self.errors.lock().iter().cloned().collect()
    }
}
