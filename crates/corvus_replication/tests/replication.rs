//! Integration tests for replication triggers and the receiver.

use corvus_core::{
    Config, CoreError, CoreResult, Database, DeleteNotifier, Etag, JsonObject, MemoryStorage,
    OperationContext, TransactionInformation, Triggers,
};
use corvus_replication::{
    conflict_version_key, is_tombstone, Lineage, Replication, ReplicationConfig,
    ReplicationOutcome, ReplicationReceiver, ReplicatedAttachment, ReplicatedDelete,
    ReplicatedDocument, SourceReplicationInformation, REPLICATION_CONFLICT,
    REPLICATION_PARENT_VERSION, REPLICATION_SOURCE, REPLICATION_VERSION,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

fn replicated_db(id: Uuid) -> Database {
    let mut builder = Triggers::builder();
    Replication::register(&mut builder, ReplicationConfig::new().hilo_capacity(2));
    Database::open_with(
        Arc::new(MemoryStorage::with_id(id)),
        Config::default(),
        builder.build(),
    )
    .unwrap()
}

fn object(value: Value) -> JsonObject {
    match value {
        Value::Object(map) => map,
        _ => JsonObject::new(),
    }
}

fn raw_metadata(db: &Database, key: &str) -> Option<JsonObject> {
    db.execute(|ctx| Ok(ctx.actions().documents().document_by_key(key)?))
        .unwrap()
        .map(|doc| doc.metadata)
}

fn raw_attachment_metadata(db: &Database, key: &str) -> Option<JsonObject> {
    db.execute(|ctx| Ok(ctx.actions().attachments().attachment(key)?))
        .unwrap()
        .map(|attachment| attachment.metadata)
}

/// Reads a document from `db` as a peer would ship it.
fn export(db: &Database, key: &str) -> ReplicatedDocument {
    let doc = db.get(key, None).unwrap().unwrap();
    ReplicatedDocument {
        key: doc.key,
        etag: doc.etag,
        data: doc.data,
        metadata: doc.metadata,
    }
}

#[test]
fn local_writes_are_stamped() {
    let id = Uuid::new_v4();
    let db = replicated_db(id);
    db.put("users/1", None, JsonObject::new(), JsonObject::new(), None)
        .unwrap();
    let first = db.get("users/1", None).unwrap().unwrap().metadata;
    assert_eq!(first.get(REPLICATION_SOURCE), Some(&json!(id.to_string())));
    assert!(first.get(REPLICATION_PARENT_VERSION).is_none());

    db.put("users/1", None, JsonObject::new(), JsonObject::new(), None)
        .unwrap();
    let second = db.get("users/1", None).unwrap().unwrap().metadata;
    assert_eq!(
        second.get(REPLICATION_PARENT_VERSION),
        first.get(REPLICATION_VERSION)
    );
    let v1 = first[REPLICATION_VERSION].as_i64().unwrap();
    let v2 = second[REPLICATION_VERSION].as_i64().unwrap();
    assert!(v2 > v1);
}

#[test]
fn system_keys_are_not_stamped() {
    let db = replicated_db(Uuid::new_v4());
    db.put("Corvus/Settings", None, JsonObject::new(), JsonObject::new(), None)
        .unwrap();
    let metadata = db.get("Corvus/Settings", None).unwrap().unwrap().metadata;
    assert!(!metadata.contains_key(REPLICATION_VERSION));
}

#[test]
fn delete_leaves_tombstone_and_reput_descends_from_it() {
    let db = replicated_db(Uuid::new_v4());
    db.put("users/1", None, JsonObject::new(), JsonObject::new(), None)
        .unwrap();
    let original = raw_metadata(&db, "users/1").unwrap();

    assert!(db.delete("users/1", None, None).unwrap());
    assert!(db.get("users/1", None).unwrap().is_none());
    assert!(db.get_documents(0, 10, None).unwrap().is_empty());

    let tombstone = raw_metadata(&db, "users/1").unwrap();
    assert!(is_tombstone(&tombstone));
    assert_eq!(
        tombstone.get(REPLICATION_PARENT_VERSION),
        original.get(REPLICATION_VERSION)
    );

    db.put("users/1", None, JsonObject::new(), JsonObject::new(), None)
        .unwrap();
    let reborn = db.get("users/1", None).unwrap().unwrap().metadata;
    assert_eq!(
        reborn.get(REPLICATION_PARENT_VERSION),
        tombstone.get(REPLICATION_VERSION)
    );
    assert!(reborn.get(REPLICATION_PARENT_VERSION).is_some());
}

struct CountDeletes(Arc<AtomicUsize>);

impl DeleteNotifier for CountDeletes {
    fn after_delete(
        &self,
        _ctx: &mut OperationContext<'_>,
        _key: &str,
        _tx: Option<&TransactionInformation>,
    ) -> CoreResult<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn deleting_a_tombstone_is_a_no_op() {
    let deletes = Arc::new(AtomicUsize::new(0));
    let mut builder = Triggers::builder();
    Replication::register(&mut builder, ReplicationConfig::new().hilo_capacity(2));
    builder
        .documents()
        .delete_notifier(Arc::new(CountDeletes(Arc::clone(&deletes))));
    builder
        .attachments()
        .delete_notifier(Arc::new(CountDeletes(Arc::clone(&deletes))));
    let db = Database::open_with(
        Arc::new(MemoryStorage::new()),
        Config::default(),
        builder.build(),
    )
    .unwrap();

    db.put("k", None, JsonObject::new(), JsonObject::new(), None)
        .unwrap();
    assert!(db.delete("k", None, None).unwrap());
    assert!(db.get("k", None).unwrap().is_none());
    let tombstone = db
        .execute(|ctx| Ok(ctx.actions().documents().document_by_key("k")?))
        .unwrap()
        .unwrap();

    assert!(!db.delete("k", None, None).unwrap());
    assert!(!db.delete("never-existed", None, None).unwrap());
    let after = db
        .execute(|ctx| Ok(ctx.actions().documents().document_by_key("k")?))
        .unwrap()
        .unwrap();
    assert_eq!(after.etag, tombstone.etag);
    assert_eq!(
        after.metadata.get(REPLICATION_VERSION),
        tombstone.metadata.get(REPLICATION_VERSION)
    );
    assert_eq!(db.statistics().unwrap().count_of_documents, 0);

    db.put_static("files/1", None, vec![1], JsonObject::new())
        .unwrap();
    assert!(db.delete_static("files/1", None).unwrap());
    assert!(!db.delete_static("files/1", None).unwrap());
    assert!(is_tombstone(&raw_attachment_metadata(&db, "files/1").unwrap()));

    assert_eq!(deletes.load(Ordering::SeqCst), 2);
}

#[test]
fn resolving_a_conflict_removes_tombstone_versions() {
    let a = replicated_db(Uuid::new_v4());
    let b = replicated_db(Uuid::new_v4());
    let dest = replicated_db(Uuid::new_v4());
    let receiver = ReplicationReceiver::new(&dest);

    b.put("users/1", None, object(json!({"by": "b"})), JsonObject::new(), None)
        .unwrap();
    receiver
        .receive_documents("http://b", b.storage_id(), vec![export(&b, "users/1")])
        .unwrap();

    a.put("users/1", None, JsonObject::new(), JsonObject::new(), None)
        .unwrap();
    a.delete("users/1", None, None).unwrap();
    let tombstone = raw_metadata(&a, "users/1").unwrap();
    let outcomes = receiver
        .receive_document_deletes(
            "http://a",
            a.storage_id(),
            vec![ReplicatedDelete {
                key: "users/1".into(),
                etag: Etag::from_parts(1, 10),
                metadata: tombstone,
            }],
        )
        .unwrap();
    let ids = match outcomes.as_slice() {
        [ReplicationOutcome::Conflicted {
            conflicted_version_ids,
        }] => conflicted_version_ids.clone(),
        other => panic!("expected a conflict, got {other:?}"),
    };
    assert!(ids
        .iter()
        .any(|id| is_tombstone(&raw_metadata(&dest, id).unwrap())));

    dest.put("users/1", None, object(json!({"by": "dest"})), JsonObject::new(), None)
        .unwrap();
    for id in &ids {
        assert!(raw_metadata(&dest, id).is_none(), "{id} should be removed");
    }
}

#[test]
fn replicated_writes_keep_remote_lineage() {
    let a = replicated_db(Uuid::new_v4());
    let dest = replicated_db(Uuid::new_v4());
    a.put("users/1", None, object(json!({"name": "a"})), JsonObject::new(), None)
        .unwrap();
    let item = export(&a, "users/1");
    let remote_version = item.metadata[REPLICATION_VERSION].clone();

    let outcomes = ReplicationReceiver::new(&dest)
        .receive_documents("http://a", a.storage_id(), vec![item])
        .unwrap();
    assert_eq!(outcomes, vec![ReplicationOutcome::Created]);

    let local = dest.get("users/1", None).unwrap().unwrap();
    assert_eq!(local.metadata[REPLICATION_VERSION], remote_version);
    assert_eq!(
        local.metadata[REPLICATION_SOURCE],
        json!(a.storage_id().to_string())
    );
}

#[test]
fn descendant_replaces_local_version() {
    let a = replicated_db(Uuid::new_v4());
    let b = replicated_db(Uuid::new_v4());
    let dest = replicated_db(Uuid::new_v4());
    let receiver = ReplicationReceiver::new(&dest);

    a.put("users/1", None, object(json!({"v": 1})), JsonObject::new(), None)
        .unwrap();
    let first = export(&a, "users/1");
    receiver
        .receive_documents("http://a", a.storage_id(), vec![first.clone()])
        .unwrap();

    // b learns the document from a, then edits it.
    ReplicationReceiver::new(&b)
        .receive_documents("http://a", a.storage_id(), vec![first])
        .unwrap();
    b.put("users/1", None, object(json!({"v": 2})), JsonObject::new(), None)
        .unwrap();

    let outcomes = receiver
        .receive_documents("http://b", b.storage_id(), vec![export(&b, "users/1")])
        .unwrap();
    assert_eq!(outcomes, vec![ReplicationOutcome::Updated]);
    assert_eq!(
        dest.get("users/1", None).unwrap().unwrap().data,
        object(json!({"v": 2}))
    );
}

#[test]
fn independent_writes_conflict_until_overwritten() {
    let a = replicated_db(Uuid::new_v4());
    let b = replicated_db(Uuid::new_v4());
    let dest = replicated_db(Uuid::new_v4());
    let receiver = ReplicationReceiver::new(&dest);

    a.put("users/1", None, object(json!({"by": "a"})), JsonObject::new(), None)
        .unwrap();
    b.put("users/1", None, object(json!({"by": "b"})), JsonObject::new(), None)
        .unwrap();
    let from_a = export(&a, "users/1");
    let from_b = export(&b, "users/1");
    let expected = vec![
        conflict_version_key(
            "users/1",
            Lineage::current(&from_a.metadata).unwrap().identifier(),
        ),
        conflict_version_key(
            "users/1",
            Lineage::current(&from_b.metadata).unwrap().identifier(),
        ),
    ];

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

    match dest.get("users/1", None) {
        Err(CoreError::Conflict {
            key,
            conflicted_version_ids,
            ..
        }) => {
            assert_eq!(key, "users/1");
            assert_eq!(conflicted_version_ids, expected);
        }
        other => panic!("expected a conflict, got {other:?}"),
    }
    let version = dest.get(&expected[1], None).unwrap().unwrap();
    assert_eq!(version.data, object(json!({"by": "b"})));

    // Listings skip the conflicted key instead of failing.
    let listed: Vec<String> = dest
        .get_documents(0, 10, None)
        .unwrap()
        .into_iter()
        .map(|doc| doc.key)
        .collect();
    assert!(!listed.contains(&"users/1".to_string()));

    dest.put(
        "users/1",
        None,
        object(json!({"by": "dest"})),
        object(json!({REPLICATION_CONFLICT: true})),
        None,
    )
    .unwrap();
    let resolved = dest.get("users/1", None).unwrap().unwrap();
    assert_eq!(resolved.data, object(json!({"by": "dest"})));
    assert!(!resolved.metadata.contains_key(REPLICATION_CONFLICT));
    for id in &expected {
        assert!(raw_metadata(&dest, id).is_none(), "{id} should be removed");
    }
}

#[test]
fn third_source_joins_existing_conflict() {
    let sources: Vec<Database> = (0..3).map(|_| replicated_db(Uuid::new_v4())).collect();
    let dest = replicated_db(Uuid::new_v4());
    let receiver = ReplicationReceiver::new(&dest);

    let mut last = None;
    for (n, source) in sources.iter().enumerate() {
        source
            .put("users/1", None, object(json!({"n": n})), JsonObject::new(), None)
            .unwrap();
        last = Some(
            receiver
                .receive_documents(
                    &format!("http://{n}"),
                    source.storage_id(),
                    vec![export(source, "users/1")],
                )
                .unwrap(),
        );
    }
    match last.unwrap().as_slice() {
        [ReplicationOutcome::Conflicted {
            conflicted_version_ids,
        }] => assert_eq!(conflicted_version_ids.len(), 3),
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[test]
fn replicated_delete_leaves_tombstone() {
    let a = replicated_db(Uuid::new_v4());
    let dest = replicated_db(Uuid::new_v4());
    let receiver = ReplicationReceiver::new(&dest);

    a.put("users/1", None, JsonObject::new(), JsonObject::new(), None)
        .unwrap();
    receiver
        .receive_documents("http://a", a.storage_id(), vec![export(&a, "users/1")])
        .unwrap();

    a.delete("users/1", None, None).unwrap();
    let tombstone = raw_metadata(&a, "users/1").unwrap();
    let outcomes = receiver
        .receive_document_deletes(
            "http://a",
            a.storage_id(),
            vec![ReplicatedDelete {
                key: "users/1".into(),
                etag: Etag::from_parts(1, 10),
                metadata: tombstone,
            }],
        )
        .unwrap();
    assert_eq!(outcomes, vec![ReplicationOutcome::Updated]);
    assert!(dest.get("users/1", None).unwrap().is_none());
    assert!(is_tombstone(&raw_metadata(&dest, "users/1").unwrap()));
}

#[test]
fn last_etag_tracks_sources() {
    let a = replicated_db(Uuid::new_v4());
    let dest = replicated_db(Uuid::new_v4());
    let receiver = ReplicationReceiver::new(&dest);

    assert_eq!(
        receiver.last_etag("http://a").unwrap(),
        SourceReplicationInformation::default()
    );

    a.put("users/1", None, JsonObject::new(), JsonObject::new(), None)
        .unwrap();
    a.put("users/2", None, JsonObject::new(), JsonObject::new(), None)
        .unwrap();
    let items = vec![export(&a, "users/1"), export(&a, "users/2")];
    let last = items[1].etag;
    receiver
        .receive_documents("http://a/", a.storage_id(), items)
        .unwrap();

    let info = receiver.last_etag("http://a").unwrap();
    assert_eq!(info, receiver.last_etag("http://a/").unwrap());
    assert_eq!(info.last_document_etag, last);
    assert_eq!(info.last_attachment_etag, Etag::ZERO);
    assert_eq!(info.server_instance_id, a.storage_id());

    assert!(receiver.last_etag("/").is_err());
}

#[test]
fn redelivered_batch_does_not_rewind_last_etag() {
    let a = replicated_db(Uuid::new_v4());
    let dest = replicated_db(Uuid::new_v4());
    let receiver = ReplicationReceiver::new(&dest);

    a.put("users/1", None, JsonObject::new(), JsonObject::new(), None)
        .unwrap();
    a.put("users/2", None, JsonObject::new(), JsonObject::new(), None)
        .unwrap();
    let older = export(&a, "users/1");
    let newer = export(&a, "users/2");
    let (older_etag, newer_etag) = (older.etag, newer.etag);

    receiver
        .receive_documents("http://a", a.storage_id(), vec![newer])
        .unwrap();
    receiver
        .receive_documents("http://a", a.storage_id(), vec![older.clone()])
        .unwrap();
    let info = receiver.last_etag("http://a").unwrap();
    assert_eq!(info.last_document_etag, newer_etag);

    // A recreated source starts a new etag sequence.
    let rebuilt = Uuid::new_v4();
    receiver
        .receive_documents("http://a", rebuilt, vec![older])
        .unwrap();
    let info = receiver.last_etag("http://a").unwrap();
    assert_eq!(info.last_document_etag, older_etag);
    assert_eq!(info.server_instance_id, rebuilt);
}

#[test]
fn attachments_follow_the_same_rules() {
    let a = replicated_db(Uuid::new_v4());
    let b = replicated_db(Uuid::new_v4());
    let dest = replicated_db(Uuid::new_v4());

    a.put_static("files/1", None, vec![1], JsonObject::new()).unwrap();
    b.put_static("files/1", None, vec![2], JsonObject::new()).unwrap();
    let ship = |db: &Database| {
        let attachment = db.get_static("files/1").unwrap().unwrap();
        ReplicatedAttachment {
            key: attachment.key,
            etag: attachment.etag,
            data: attachment.data,
            metadata: attachment.metadata,
        }
    };

    let receiver = ReplicationReceiver::new(&dest);
    receiver
        .receive_attachments("http://a", a.storage_id(), vec![ship(&a)])
        .unwrap();
    receiver
        .receive_attachments("http://b", b.storage_id(), vec![ship(&b)])
        .unwrap();
    assert!(matches!(
        dest.get_static("files/1"),
        Err(CoreError::Conflict { .. })
    ));

    dest.put_static("files/1", None, vec![3], JsonObject::new()).unwrap();
    assert_eq!(dest.get_static("files/1").unwrap().unwrap().data, vec![3]);

    assert!(dest.delete_static("files/1", None).unwrap());
    assert!(dest.get_static("files/1").unwrap().is_none());
    assert!(is_tombstone(
        &raw_attachment_metadata(&dest, "files/1").unwrap()
    ));
    assert_eq!(
        receiver.last_etag("http://b").unwrap().server_instance_id,
        b.storage_id()
    );
}
