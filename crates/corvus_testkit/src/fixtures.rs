//! Test fixtures and database helpers.
//!
//! Provides convenience functions for setting up test databases
//! and common test scenarios.

use corvus_core::{Config, Database, JsonObject, MemoryStorage, Triggers, TriggersBuilder};
use corvus_replication::{Replication, ReplicationConfig};
use serde_json::Value;
use std::sync::{Arc, Once};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// A test database over an in-memory engine.
///
/// The engine is kept alongside the database so a test can [`reopen`]
/// it, which is how a process restart is simulated.
///
/// [`reopen`]: TestDatabase::reopen
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    storage: Arc<MemoryStorage>,
}

impl TestDatabase {
    /// Creates a new in-memory test database with no triggers.
    pub fn memory() -> Self {
        Self::with_triggers(Config::default(), Triggers::empty())
    }

    /// Creates a test database with the given configuration and triggers.
    pub fn with_triggers(config: Config, triggers: Triggers) -> Self {
        Self::open(Arc::new(MemoryStorage::new()), config, triggers)
    }

    /// Creates a test database with replication installed.
    ///
    /// `configure` may register further triggers; they run after the
    /// replication triggers.
    pub fn replicated(
        instance_id: Uuid,
        config: ReplicationConfig,
        configure: impl FnOnce(&mut TriggersBuilder),
    ) -> Self {
        let mut builder = Triggers::builder();
        Replication::register(&mut builder, config);
        configure(&mut builder);
        Self::open(
            Arc::new(MemoryStorage::with_id(instance_id)),
            Config::default(),
            builder.build(),
        )
    }

    fn open(storage: Arc<MemoryStorage>, config: Config, triggers: Triggers) -> Self {
        init_test_tracing();
        let db = Database::open_with(storage.clone(), config, triggers)
            .expect("Failed to open in-memory database");
        Self { db, storage }
    }

    /// Disposes the database and opens a new one over the same engine.
    pub fn reopen(self, config: Config, triggers: Triggers) -> Self {
        let Self { db, storage } = self;
        db.dispose();
        drop(db);
        Self::open(storage, config, triggers)
    }

    /// The engine underneath.
    pub fn storage(&self) -> &Arc<MemoryStorage> {
        &self.storage
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

impl std::ops::DerefMut for TestDatabase {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.db
    }
}

/// Runs a test with a temporary in-memory database.
///
/// # Example
///
/// ```rust
/// use corvus_testkit::{object, with_temp_db};
/// use serde_json::json;
///
/// with_temp_db(|db| {
///     db.put("users/1", None, object(json!({"name": "ayende"})), Default::default(), None)
///         .unwrap();
///     assert!(db.get("users/1", None).unwrap().is_some());
/// });
/// ```
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let test_db = TestDatabase::memory();
    f(&test_db.db)
}

/// Converts a JSON literal into an object, yielding an empty object for
/// anything else.
pub fn object(value: Value) -> JsonObject {
    match value {
        Value::Object(map) => map,
        _ => JsonObject::new(),
    }
}

/// Installs a `tracing` subscriber for tests, once per process.
///
/// Honours `RUST_LOG`; silent by default.
pub fn init_test_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("off"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use serde_json::json;

    /// Creates a database holding `count` documents keyed `docs/{i}`.
    pub fn populated_database(count: usize) -> TestDatabase {
        let test_db = TestDatabase::memory();
        for i in 0..count {
            test_db
                .put(
                    &format!("docs/{i}"),
                    None,
                    object(json!({ "index": i })),
                    JsonObject::new(),
                    None,
                )
                .expect("Failed to put document");
        }
        test_db
    }

    /// Creates two replicated databases with distinct instance ids.
    pub fn replication_pair() -> (TestDatabase, TestDatabase) {
        let config = ReplicationConfig::new().hilo_capacity(16);
        (
            TestDatabase::replicated(Uuid::new_v4(), config, |_| {}),
            TestDatabase::replicated(Uuid::new_v4(), config, |_| {}),
        )
    }
}
