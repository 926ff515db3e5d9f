//! Replication benchmarks.

use corvus_bench::random_document;
use corvus_core::{Config, Database, JsonObject, MemoryStorage, Triggers};
use corvus_replication::{
    Replication, ReplicationConfig, ReplicationHiLo, ReplicationReceiver, ReplicatedDocument,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use uuid::Uuid;

fn replicated_db(capacity: i64) -> Database {
    let mut builder = Triggers::builder();
    Replication::register(&mut builder, ReplicationConfig::new().hilo_capacity(capacity));
    Database::open_with(
        Arc::new(MemoryStorage::new()),
        Config::default(),
        builder.build(),
    )
    .unwrap()
}

/// Benchmark a stamped local put, for several HiLo block sizes.
fn bench_stamped_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("stamped_put");

    for capacity in [1, 64, 1024].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(capacity),
            capacity,
            |b, &capacity| {
                let db = replicated_db(capacity);
                let body = random_document(128);

                b.iter(|| {
                    db.put("bench/1", None, black_box(body.clone()), JsonObject::new(), None)
                        .unwrap();
                });
            },
        );
    }
    group.finish();
}

/// Benchmark HiLo allocation inside a storage batch.
fn bench_hilo(c: &mut Criterion) {
    let db = Database::open_in_memory().unwrap();
    let hilo = ReplicationHiLo::new(1024);

    c.bench_function("hilo_next_id", |b| {
        b.iter(|| {
            let id = db
                .execute(|ctx| hilo.next_id(ctx.actions().general()))
                .unwrap();
            black_box(id);
        });
    });
}

/// Benchmark receiving batches of fresh documents from a peer.
fn bench_receive(c: &mut Criterion) {
    let mut group = c.benchmark_group("receive_documents");

    for count in [10, 100].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let source = replicated_db(1024);
            let items: Vec<ReplicatedDocument> = (0..count)
                .map(|i| {
                    let key = format!("bench/{i}");
                    source
                        .put(&key, None, random_document(128), JsonObject::new(), None)
                        .unwrap();
                    let doc = source.get(&key, None).unwrap().unwrap();
                    ReplicatedDocument {
                        key: doc.key,
                        etag: doc.etag,
                        data: doc.data,
                        metadata: doc.metadata,
                    }
                })
                .collect();
            let source_id = Uuid::new_v4();

            b.iter(|| {
                let dest = replicated_db(1024);
                ReplicationReceiver::new(&dest)
                    .receive_documents("http://source", source_id, black_box(items.clone()))
                    .unwrap();
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_stamped_put, bench_hilo, bench_receive);
criterion_main!(benches);
