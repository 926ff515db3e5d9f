//! End-to-end scenarios across the core and replication crates.

use corvus_core::{
    Command, Config, CoreError, Etag, JsonObject, PatchRequest, PatchResult,
    TransactionInformation, Triggers, READ_VETO_METADATA,
};
use corvus_replication::{
    conflict_version_key, is_tombstone, Lineage, ReplicationConfig, ReplicationOutcome,
    ReplicationReceiver, ReplicatedDocument, SourceReplicationInformation, CONFLICTS,
    REPLICATION_PARENT_SOURCE, REPLICATION_PARENT_VERSION, REPLICATION_SOURCE,
    REPLICATION_VERSION,
};
use corvus_testkit::prelude::*;
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use uuid::Uuid;

fn raw_metadata(db: &TestDatabase, key: &str) -> Option<JsonObject> {
    db.execute(|ctx| Ok(ctx.actions().documents().document_by_key(key)?))
        .unwrap()
        .map(|doc| doc.metadata)
}

fn export(db: &TestDatabase, key: &str) -> ReplicatedDocument {
    let doc = db.get(key, None).unwrap().unwrap();
    ReplicatedDocument {
        key: doc.key,
        etag: doc.etag,
        data: doc.data,
        metadata: doc.metadata,
    }
}

// ============================================================================
// Etags and concurrency
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn etags_strictly_increase_per_key(
        key in document_key_strategy(),
        bodies in prop::collection::vec(document_body_strategy(), 1..8),
    ) {
        let db = TestDatabase::memory();
        let mut previous: Option<Etag> = None;
        for body in bodies {
            let written = db.put(&key, None, body, JsonObject::new(), None).unwrap();
            prop_assert!(previous.map_or(true, |p| written.etag > p));
            let stored = db.get(&key, None).unwrap().unwrap();
            prop_assert_eq!(stored.etag, written.etag);
            previous = Some(written.etag);
        }
    }

    #[test]
    fn reserved_metadata_never_reaches_storage(
        body in document_body_strategy(),
        metadata in metadata_strategy(),
    ) {
        let db = TestDatabase::memory();
        db.put("docs/1", None, body, metadata, None).unwrap();
        let stored = raw_metadata(&db, "docs/1").unwrap();
        prop_assert!(stored.keys().all(|name| !name.starts_with('@') || name == "@id"));
        prop_assert_eq!(stored.get("@id"), Some(&json!("docs/1")));
    }
}

#[test]
fn stale_etag_fails_and_leaves_storage_untouched() {
    let db = TestDatabase::memory();
    let first = db
        .put("users/1", None, object(json!({"v": 1})), JsonObject::new(), None)
        .unwrap();
    let second = db
        .put("users/1", None, object(json!({"v": 2})), JsonObject::new(), None)
        .unwrap();

    let err = db
        .put(
            "users/1",
            Some(first.etag),
            object(json!({"v": 3})),
            JsonObject::new(),
            None,
        )
        .unwrap_err();
    assert!(err.is_concurrency());
    assert!(db.delete("users/1", Some(first.etag), None).unwrap_err().is_concurrency());

    let doc = db.get("users/1", None).unwrap().unwrap();
    assert_eq!(doc.etag, second.etag);
    assert_eq!(doc.data["v"], json!(2));
}

// ============================================================================
// Transactions
// ============================================================================

#[test]
fn transactional_put_is_invisible_until_commit() {
    let db = TestDatabase::memory();
    let tx = TransactionInformation::new(Duration::from_secs(60));
    db.put("users/1", None, object(json!({"v": 1})), JsonObject::new(), Some(&tx))
        .unwrap();

    assert!(db.get("users/1", None).unwrap().is_none());
    let seen = db.get("users/1", Some(&tx)).unwrap().unwrap();
    assert_eq!(seen.data["v"], json!(1));

    db.commit(tx.id).unwrap();
    assert_eq!(db.get("users/1", None).unwrap().unwrap().data["v"], json!(1));
    assert!(db.pending_transactions().unwrap().is_empty());
}

#[test]
fn rollback_restores_the_exact_previous_state() {
    let db = TestDatabase::memory();
    let before = db
        .put("users/1", None, object(json!({"v": 1})), object(json!({"Tag": "a"})), None)
        .unwrap();
    let snapshot = db.get("users/1", None).unwrap().unwrap();

    let tx = TransactionInformation::new(Duration::from_secs(60));
    db.put("users/1", None, object(json!({"v": 2})), JsonObject::new(), Some(&tx))
        .unwrap();
    db.delete("users/2", None, Some(&tx)).unwrap();
    db.rollback(tx.id).unwrap();

    let after = db.get("users/1", None).unwrap().unwrap();
    assert_eq!(after.etag, before.etag);
    assert_eq!(after.data, snapshot.data);
    assert_eq!(after.metadata, snapshot.metadata);
    assert!(db.pending_transactions().unwrap().is_empty());
}

#[test]
fn second_transaction_waits_for_expiry_of_the_first() {
    let db = TestDatabase::memory();
    let first = TransactionInformation::new(Duration::from_millis(100));
    let second = TransactionInformation::new(Duration::from_secs(60));

    db.put("users/1", None, object(json!({"by": "first"})), JsonObject::new(), Some(&first))
        .unwrap();
    let err = db
        .put("users/1", None, object(json!({"by": "second"})), JsonObject::new(), Some(&second))
        .unwrap_err();
    assert!(matches!(err, CoreError::Concurrency { .. }));

    thread::sleep(Duration::from_millis(250));
    db.put("users/1", None, object(json!({"by": "second"})), JsonObject::new(), Some(&second))
        .unwrap();
    db.commit(second.id).unwrap();
    assert_eq!(
        db.get("users/1", None).unwrap().unwrap().data["by"],
        json!("second")
    );
}

#[test]
fn modified_transaction_commits_under_the_new_id() {
    let db = TestDatabase::memory();
    let local = TransactionInformation::new(Duration::from_secs(60));
    let promoted = TransactionInformation::new(Duration::from_secs(60));
    db.put("users/1", None, object(json!({"v": 1})), JsonObject::new(), Some(&local))
        .unwrap();

    db.modify_transaction_id(local.id, &promoted).unwrap();
    let pending: Vec<_> = db
        .pending_transactions()
        .unwrap()
        .into_iter()
        .map(|tx| tx.id)
        .collect();
    assert_eq!(pending, vec![promoted.id]);

    db.commit(promoted.id).unwrap();
    assert!(db.get("users/1", None).unwrap().is_some());
}

#[test]
fn pending_transaction_is_recoverable_after_restart() {
    let db = TestDatabase::memory();
    let tx = TransactionInformation::new(Duration::from_secs(60));
    db.put("users/1", None, object(json!({"v": 1})), JsonObject::new(), Some(&tx))
        .unwrap();

    let db = db.reopen(Config::default(), Triggers::empty());
    let pending = db.pending_transactions().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, tx.id);
    db.commit(tx.id).unwrap();
    assert!(db.get("users/1", None).unwrap().is_some());
}

// ============================================================================
// Triggers
// ============================================================================

#[test]
fn oversized_attachment_is_vetoed() {
    let mut builder = Triggers::builder();
    builder
        .attachments()
        .put_veto(Arc::new(RefuseBigAttachmentPutTrigger::new(5)));
    let db = TestDatabase::with_triggers(Config::default(), builder.build());

    let err = db
        .put_static("ayende", None, vec![0; 6], JsonObject::new())
        .unwrap_err();
    assert!(matches!(err, CoreError::Vetoed { .. }));
    let message = err.to_string();
    assert!(message.contains("RefuseBigAttachmentPutTrigger"), "{message}");
    assert!(message.contains("too big"), "{message}");
    assert!(db.get_static("ayende").unwrap().is_none());

    db.put_static("ayende", None, vec![0; 5], JsonObject::new())
        .unwrap();
    assert_eq!(db.get_static("ayende").unwrap().unwrap().data.len(), 5);
}

#[test]
fn delete_veto_keeps_the_document() {
    let mut builder = Triggers::builder();
    builder
        .documents()
        .delete_veto(Arc::new(RefuseDeleteTrigger::new("users/")));
    let db = TestDatabase::with_triggers(Config::default(), builder.build());
    db.put("users/1", None, JsonObject::new(), JsonObject::new(), None)
        .unwrap();

    let err = db.delete("users/1", None, None).unwrap_err();
    assert!(err.to_string().contains("Cannot delete users/"));
    assert!(db.get("users/1", None).unwrap().is_some());
    assert!(db.delete("orders/1", None, None).is_ok());
}

#[test]
fn mutators_rewrite_batched_puts() {
    let mut builder = Triggers::builder();
    builder.documents().put_mutator(Arc::new(UpperCaseNamesTrigger));
    let db = TestDatabase::with_triggers(Config::default(), builder.build());

    let results = db
        .batch(vec![
            Command::Put {
                key: "users/1".into(),
                etag: None,
                document: object(json!({"name": "ayende", "visits": 1})),
                metadata: JsonObject::new(),
                transaction: None,
            },
            Command::Patch {
                key: "users/1".into(),
                etag: None,
                patches: vec![PatchRequest::Inc {
                    name: "visits".into(),
                    value: 2,
                }],
                transaction: None,
            },
        ])
        .unwrap();
    assert_eq!(results.len(), 2);
    assert!(matches!(
        results[1].patch_result,
        Some(PatchResult::Patched { .. })
    ));

    let doc = db.get("users/1", None).unwrap().unwrap();
    assert_eq!(doc.data["name"], json!("AYENDE"));
    assert_eq!(doc.data["visits"], json!(3));
}

#[test]
fn commit_notifications_follow_durability() {
    let recorder = Arc::new(RecordingCommitNotifier::new());
    let mut builder = Triggers::builder();
    builder
        .documents()
        .put_commit_notifier(recorder.clone())
        .delete_commit_notifier(recorder.clone());
    let db = TestDatabase::with_triggers(Config::default(), builder.build());

    let tx = TransactionInformation::new(Duration::from_secs(60));
    db.put("users/1", None, JsonObject::new(), JsonObject::new(), Some(&tx))
        .unwrap();
    assert!(recorder.puts().is_empty());

    db.commit(tx.id).unwrap();
    let puts = recorder.puts();
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0].0, "users/1");

    db.delete("users/1", None, None).unwrap();
    db.delete("users/404", None, None).unwrap();
    assert_eq!(recorder.deletes(), vec!["users/1".to_string()]);
}

#[test]
fn listings_apply_read_triggers() {
    let mut builder = Triggers::builder();
    builder.documents().read(Arc::new(VisibilityReadTrigger));
    let db = TestDatabase::with_triggers(Config::default(), builder.build());
    db.put("docs/plain", None, object(json!({"v": 1})), JsonObject::new(), None)
        .unwrap();
    db.put("docs/hidden", None, object(json!({"v": 2})), object(json!({"Hidden": true})), None)
        .unwrap();
    db.put(
        "docs/secret",
        None,
        object(json!({"v": 3})),
        object(json!({"Confidential": true})),
        None,
    )
    .unwrap();

    let listed = db.get_documents(0, 10, None).unwrap();
    let keys: Vec<_> = listed.iter().map(|doc| doc.key.as_str()).collect();
    assert_eq!(keys, vec!["docs/secret", "docs/plain"]);

    let secret = &listed[0];
    assert!(secret.data.is_empty());
    assert!(secret.metadata.contains_key(READ_VETO_METADATA));
    assert!(db.get("docs/hidden", None).unwrap().is_none());
}

// ============================================================================
// Indexing
// ============================================================================

#[test]
fn background_indexing_follows_writes_and_deletes() {
    let mut builder = Triggers::builder();
    builder.documents().read(Arc::new(VisibilityReadTrigger));
    let db = TestDatabase::with_triggers(
        Config::default().work_wait_timeout(Duration::from_millis(50)),
        builder.build(),
    );
    assert!(db.put_index("by_key").unwrap());
    assert!(!db.put_index("by_key").unwrap());

    db.put("docs/hidden", None, JsonObject::new(), object(json!({"Hidden": true})), None)
        .unwrap();
    db.put("docs/1", None, JsonObject::new(), JsonObject::new(), None)
        .unwrap();
    db.put("docs/2", None, JsonObject::new(), JsonObject::new(), None)
        .unwrap();

    let engine = Arc::new(RecordingIndexingEngine::new());
    db.spin_background_workers(engine.clone()).unwrap();
    assert!(wait_until(Duration::from_secs(10), || {
        engine.contains("by_key", "docs/1") && engine.contains("by_key", "docs/2")
    }));
    assert!(!engine.contains("by_key", "docs/hidden"));

    db.delete("docs/1", None, None).unwrap();
    assert!(wait_until(Duration::from_secs(10), || {
        !engine.contains("by_key", "docs/1")
    }));
    assert!(wait_until(Duration::from_secs(10), || {
        !db.is_index_stale("by_key").unwrap()
    }));
    db.stop_background_workers();
}

#[test]
fn unknown_index_is_reported() {
    let db = TestDatabase::memory();
    assert!(db.reset_index("missing").is_err());
    assert!(!db.delete_index("missing").unwrap());
}

// ============================================================================
// Replication
// ============================================================================

#[test]
fn re_put_after_delete_descends_from_the_tombstone() {
    let db = TestDatabase::replicated(Uuid::new_v4(), ReplicationConfig::new(), |_| {});
    db.put("users/1", None, JsonObject::new(), JsonObject::new(), None)
        .unwrap();
    db.delete("users/1", None, None).unwrap();

    let tombstone = raw_metadata(&db, "users/1").unwrap();
    assert!(is_tombstone(&tombstone));
    assert!(db.get("users/1", None).unwrap().is_none());

    db.put("users/1", None, JsonObject::new(), JsonObject::new(), None)
        .unwrap();
    let revived = raw_metadata(&db, "users/1").unwrap();
    assert!(!is_tombstone(&revived));
    assert_eq!(
        revived.get(REPLICATION_PARENT_VERSION),
        tombstone.get(REPLICATION_VERSION)
    );
    assert_eq!(
        revived.get(REPLICATION_PARENT_SOURCE),
        tombstone.get(REPLICATION_SOURCE)
    );
}

#[test]
fn independent_sources_produce_one_conflict_record() {
    let (a, b) = scenarios::replication_pair();
    let dest = TestDatabase::replicated(Uuid::new_v4(), ReplicationConfig::new(), |_| {});

    a.put("users/1", None, object(json!({"from": "a"})), JsonObject::new(), None)
        .unwrap();
    b.put("users/1", None, object(json!({"from": "b"})), JsonObject::new(), None)
        .unwrap();
    let from_a = export(&a, "users/1");
    let from_b = export(&b, "users/1");
    let expected = vec![
        conflict_version_key("users/1", Lineage::current(&from_a.metadata).unwrap().identifier()),
        conflict_version_key("users/1", Lineage::current(&from_b.metadata).unwrap().identifier()),
    ];

    let receiver = ReplicationReceiver::new(&dest.db);
    receiver
        .receive_documents("http://a", a.storage_id(), vec![from_a])
        .unwrap();
    let outcomes = receiver
        .receive_documents("http://b", b.storage_id(), vec![from_b])
        .unwrap();
    assert_eq!(
        outcomes,
        vec![ReplicationOutcome::Conflicted {
            conflicted_version_ids: expected.clone()
        }]
    );

    let record = raw_metadata(&dest, "users/1").unwrap();
    assert_eq!(record.get(CONFLICTS), Some(&json!(expected)));
    match dest.get("users/1", None).unwrap_err() {
        CoreError::Conflict {
            conflicted_version_ids,
            ..
        } => assert_eq!(conflicted_version_ids, expected),
        other => panic!("expected a conflict, got {other}"),
    }

    dest.put("users/1", None, object(json!({"from": "dest"})), JsonObject::new(), None)
        .unwrap();
    assert_eq!(
        dest.get("users/1", None).unwrap().unwrap().data["from"],
        json!("dest")
    );
    for id in &expected {
        assert!(raw_metadata(&dest, id).is_none());
    }
}

#[test]
fn last_etag_is_zero_for_unseen_sources_and_ignores_trailing_separators() {
    let (source, dest) = scenarios::replication_pair();
    let receiver = ReplicationReceiver::new(&dest.db);
    assert_eq!(
        receiver.last_etag("http://peer/").unwrap(),
        SourceReplicationInformation::default()
    );

    source
        .put("users/1", None, JsonObject::new(), JsonObject::new(), None)
        .unwrap();
    let item = export(&source, "users/1");
    let etag = item.etag;
    receiver
        .receive_documents("http://peer/", source.storage_id(), vec![item])
        .unwrap();

    let with_slash = receiver.last_etag("http://peer/").unwrap();
    let without_slash = receiver.last_etag("http://peer").unwrap();
    assert_eq!(with_slash, without_slash);
    assert_eq!(with_slash.last_document_etag, etag);
    assert_eq!(with_slash.server_instance_id, source.storage_id());
}
