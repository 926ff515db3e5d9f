//! An indexing engine that records what it is fed.

use corvus_core::{IndexingEngine, IndexingFailure, JsonDocument};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::thread;
use std::time::{Duration, Instant};

/// Keeps, per index, the set of keys currently indexed.
///
/// Documents whose key starts with a configured poison prefix are
/// reported as failures.
#[derive(Debug, Default)]
pub struct RecordingIndexingEngine {
    indexed: Mutex<BTreeMap<String, BTreeSet<String>>>,
    poison_prefix: Option<String>,
}

impl RecordingIndexingEngine {
    /// Creates an engine that accepts every document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an engine failing every document under `prefix`.
    pub fn failing_on(prefix: impl Into<String>) -> Self {
        Self {
            indexed: Mutex::default(),
            poison_prefix: Some(prefix.into()),
        }
    }

    /// Keys currently held by `index`.
    pub fn keys(&self, index: &str) -> BTreeSet<String> {
        self.indexed.lock().get(index).cloned().unwrap_or_default()
    }

    /// Returns true if `index` holds `key`.
    pub fn contains(&self, index: &str, key: &str) -> bool {
        self.indexed
            .lock()
            .get(index)
            .is_some_and(|keys| keys.contains(key))
    }
}

impl IndexingEngine for RecordingIndexingEngine {
    fn index_documents(&self, index: &str, documents: &[JsonDocument]) -> Vec<IndexingFailure> {
        let mut indexed = self.indexed.lock();
        let keys = indexed.entry(index.to_string()).or_default();
        let mut failures = Vec::new();
        for doc in documents {
            match &self.poison_prefix {
                Some(prefix) if doc.key.starts_with(prefix.as_str()) => {
                    failures.push(IndexingFailure::for_key(doc.key.clone(), "poisoned document"));
                }
                _ => {
                    keys.insert(doc.key.clone());
                }
            }
        }
        failures
    }

    fn remove_from_index(&self, index: &str, keys: &[String]) -> Vec<IndexingFailure> {
        if let Some(indexed) = self.indexed.lock().get_mut(index) {
            for key in keys {
                indexed.remove(key);
            }
        }
        Vec::new()
    }
}

/// Polls `condition` every 10ms until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corvus_core::{Etag, JsonObject};
    use std::time::SystemTime;

    fn doc(key: &str) -> JsonDocument {
        JsonDocument {
            key: key.to_string(),
            data: JsonObject::new(),
            metadata: JsonObject::new(),
            etag: Etag::from_parts(1, 1),
            last_modified: SystemTime::now(),
        }
    }

    #[test]
    fn records_and_removes() {
        let engine = RecordingIndexingEngine::new();
        assert!(engine
            .index_documents("by_name", &[doc("a"), doc("b")])
            .is_empty());
        engine.remove_from_index("by_name", &["a".to_string()]);
        assert!(!engine.contains("by_name", "a"));
        assert!(engine.contains("by_name", "b"));
    }

    #[test]
    fn poisoned_documents_fail() {
        let engine = RecordingIndexingEngine::failing_on("bad/");
        let failures = engine.index_documents("by_name", &[doc("bad/1"), doc("good/1")]);
        assert_eq!(failures.len(), 1);
        assert_eq!(engine.keys("by_name").len(), 1);
    }

    #[test]
    fn wait_until_times_out() {
        assert!(!wait_until(Duration::from_millis(20), || false));
        assert!(wait_until(Duration::from_millis(20), || true));
    }
}
