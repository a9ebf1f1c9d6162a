//! Extraction Throughput Benchmarks
//!
//! Measures classification cost per operation:
//! - Fresh keys (every put is a Create, one reference miss each)
//! - Hot keys (repeated updates served from history)
//! - Raw log entries (checksum + write-batch decode + classification)
//!
//! Run with: cargo bench -p kvtail-cdc

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use kvtail_cdc::kv::{
    EmptyReferenceStore, Extractor, JsonValueCodec, ReferenceStore, SchemaRegistry, Utf8KeyCodec,
};
use kvtail_core::{LogEntry, RawOperation, SequenceNumber, TableId, WriteBatchBuilder};
use serde_json::json;
use std::sync::Arc;

const KEYS: TableId = TableId(3);

fn registry() -> Arc<SchemaRegistry> {
    Arc::new(
        SchemaRegistry::builder()
            .register(KEYS, "keyTable", Utf8KeyCodec, JsonValueCodec::object("KeyInfo"))
            .build()
            .expect("registry"),
    )
}

fn key_value(i: usize) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "volume": "vol1",
        "bucket": "bucket1",
        "key": format!("key-{}", i),
        "size": i * 1024,
        "replication": "RATIS/THREE",
    }))
    .expect("json")
}

fn operations(count: usize, distinct_keys: usize) -> Vec<RawOperation> {
    (0..count)
        .map(|i| {
            RawOperation::put(
                KEYS,
                format!("/vol1/bucket1/key-{:08}", i % distinct_keys),
                key_value(i),
            )
        })
        .collect()
}

fn extractor(registry: &Arc<SchemaRegistry>) -> Extractor {
    let reference: Arc<dyn ReferenceStore> = Arc::new(EmptyReferenceStore);
    Extractor::new(Arc::clone(registry), reference)
}

fn benchmark_classification(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("runtime");
    let registry = registry();
    let mut group = c.benchmark_group("extract");

    for ops in [64usize, 1024] {
        for (label, distinct) in [("fresh_keys", ops), ("hot_keys", 8)] {
            let batch = operations(ops, distinct);
            let batch = &batch;
            group.throughput(Throughput::Elements(ops as u64));
            group.bench_with_input(BenchmarkId::new(label, ops), &ops, |b, _| {
                b.to_async(&rt).iter_batched(
                    || extractor(&registry),
                    |mut extractor| async move {
                        extractor
                            .extract(SequenceNumber(1), batch)
                            .await
                            .expect("extract")
                    },
                    BatchSize::SmallInput,
                )
            });
        }
    }

    group.finish();
}

fn benchmark_raw_entries(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("runtime");
    let registry = registry();
    let mut group = c.benchmark_group("extract_raw");

    for ops in [64usize, 1024] {
        let mut builder = WriteBatchBuilder::new();
        for i in 0..ops {
            builder = builder.put_cf(KEYS, format!("/vol1/bucket1/key-{:08}", i), key_value(i));
        }
        let entry = LogEntry::new(SequenceNumber(1), builder.build(SequenceNumber(1)));
        let entry = &entry;

        group.throughput(Throughput::Bytes(entry.data.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(ops), &ops, |b, _| {
            b.to_async(&rt).iter_batched(
                || extractor(&registry),
                |mut extractor| async move {
                    extractor.process_raw(entry).await.expect("process")
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_classification, benchmark_raw_entries);
criterion_main!(benches);
