/// Tail an in-memory commit log
///
/// Commits a few metadata batches to a `MemoryCommitLog` from a writer task
/// while a tailing session prints every change event as JSON.
///
/// Run with:
/// ```
/// RUST_LOG=kvtail_cdc=debug cargo run -p kvtail-cdc --example tail_memory_log
/// ```
use async_trait::async_trait;
use kvtail_cdc::kv::{
    EventSink, ExtractedBatch, JsonValueCodec, MemoryReferenceStore, SchemaRegistry, TailerConfig,
    TailingSession, Utf8KeyCodec,
};
use kvtail_cdc::Result;
use kvtail_core::{MemoryCommitLog, TableId, WriteBatchBuilder};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const VOLUMES: TableId = TableId(1);
const KEYS: TableId = TableId(2);

/// Prints each batch to stdout.
struct PrintSink;

#[async_trait]
impl EventSink for PrintSink {
    async fn apply(&self, batch: &ExtractedBatch) -> Result<()> {
        println!(
            "-- batch {} ({} events, next at {})",
            batch.sequence,
            batch.len(),
            batch.next_sequence
        );
        for event in &batch.events {
            println!("{}", serde_json::to_string(event)?);
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let registry = SchemaRegistry::builder()
        .register(VOLUMES, "volumeTable", Utf8KeyCodec, JsonValueCodec::object("VolumeInfo"))
        .register(KEYS, "keyTable", Utf8KeyCodec, JsonValueCodec::object("KeyInfo"))
        .build()?;

    // The reference store already knows the volume from before this session
    let reference = Arc::new(MemoryReferenceStore::new());
    reference.insert(VOLUMES, "/vol1", json!({"volume": "vol1", "owner": "bilbo"}));

    let log = Arc::new(MemoryCommitLog::new());
    let config = TailerConfig::builder()
        .session_name("example")
        .poll_interval_ms(50)
        .build()?;
    let mut session = TailingSession::new(log.clone(), Arc::new(registry), reference, config)?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let tailer = tokio::spawn(async move {
        let report = session.run(&PrintSink, shutdown_rx).await;
        (session, report)
    });

    let batches = [
        WriteBatchBuilder::new().put_cf(
            VOLUMES,
            "/vol1",
            json!({"volume": "vol1", "owner": "frodo"}).to_string(),
        ),
        WriteBatchBuilder::new()
            .put_cf(KEYS, "/vol1/b1/k1", json!({"size": 1024}).to_string())
            .put_cf(KEYS, "/vol1/b1/k1", json!({"size": 2048}).to_string()),
        WriteBatchBuilder::new()
            .delete_cf(KEYS, "/vol1/b1/k1")
            .delete_cf(KEYS, "/vol1/b1/k1"),
    ];
    for batch in &batches {
        log.append(batch)?;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    shutdown_tx.send(())?;
    let (session, report) = tailer.await?;
    let report = report?;

    println!(
        "delivered {} batches / {} events, committed {:?}",
        report.batches,
        report.events,
        session.committed()
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&session.metrics().snapshot())?
    );
    Ok(())
}
