//! Storage engine benchmarks.

use corvus_bench::{generate_documents, random_document};
use corvus_core::EtagGenerator;
use corvus_storage::{JsonObject, MemoryStorage, TransactionalStorage};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn open_storage() -> MemoryStorage {
    let storage = MemoryStorage::new();
    storage.initialize().unwrap();
    storage
}

/// Benchmark committing batches of document writes.
fn bench_batch_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("storage_batch_commit");

    for count in [1, 10, 100].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let storage = open_storage();
            let etags = EtagGenerator::new(1);
            let documents = generate_documents(count, 128);

            b.iter(|| {
                let mut batch = storage.begin_batch().unwrap();
                for (key, body) in &documents {
                    batch
                        .documents()
                        .add_document(key, None, etags.next(), body.clone(), JsonObject::new())
                        .unwrap();
                }
                batch.commit().unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark a dropped batch, which undoes its writes.
fn bench_batch_rollback(c: &mut Criterion) {
    let storage = open_storage();
    let etags = EtagGenerator::new(1);
    let body = random_document(128);

    c.bench_function("storage_batch_rollback", |b| {
        b.iter(|| {
            let mut batch = storage.begin_batch().unwrap();
            batch
                .documents()
                .add_document("bench/1", None, etags.next(), body.clone(), JsonObject::new())
                .unwrap();
            drop(black_box(batch));
        });
    });
}

/// Benchmark enumerating documents after an etag.
fn bench_documents_after(c: &mut Criterion) {
    let storage = open_storage();
    let etags = EtagGenerator::new(1);
    let first = etags.next();
    let mut batch = storage.begin_batch().unwrap();
    for (key, body) in generate_documents(10_000, 64) {
        batch
            .documents()
            .add_document(&key, None, etags.next(), body, JsonObject::new())
            .unwrap();
    }
    batch.commit().unwrap();

    c.bench_function("documents_after_take_1024", |b| {
        b.iter(|| {
            let mut batch = storage.begin_batch().unwrap();
            let page = batch
                .documents()
                .documents_after(black_box(first), 1024)
                .unwrap();
            black_box(page);
        });
    });
}

/// Benchmark identity allocation.
fn bench_identity(c: &mut Criterion) {
    let storage = open_storage();

    c.bench_function("next_identity_value", |b| {
        b.iter(|| {
            let mut batch = storage.begin_batch().unwrap();
            let value = batch
                .general()
                .next_identity_value(black_box("bench"))
                .unwrap();
            batch.commit().unwrap();
            black_box(value);
        });
    });
}

/// Benchmark etag generation.
fn bench_etag_generation(c: &mut Criterion) {
    let etags = EtagGenerator::new(42);

    c.bench_function("etag_next", |b| {
        b.iter(|| black_box(etags.next()));
    });
}

criterion_group!(
    benches,
    bench_batch_commit,
    bench_batch_rollback,
    bench_documents_after,
    bench_identity,
    bench_etag_generation,
);
criterion_main!(benches);
