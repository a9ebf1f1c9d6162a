//! Shared helpers for kvtail-cdc integration tests

#![allow(dead_code)]

use kvtail_cdc::kv::{
    JsonValueCodec, MemoryReferenceStore, SchemaRegistry, TailerConfig, U64KeyCodec,
    U64ValueCodec, Utf8KeyCodec,
};
use kvtail_cdc::{ChangeAction, ChangeEvent};
use kvtail_core::TableId;
use serde_json::Value;
use std::sync::{Arc, Once};

pub const VOLUME_TABLE: TableId = TableId(1);
pub const BUCKET_TABLE: TableId = TableId(2);
pub const KEY_TABLE: TableId = TableId(3);
pub const SEQUENCE_TABLE: TableId = TableId(4);

static INIT: Once = Once::new();

/// Initialize test logging (idempotent)
pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("kvtail_cdc=debug".parse().unwrap()),
            )
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Metadata-store style registry: volumes, buckets, keys, and a counter table.
pub fn metadata_registry() -> Arc<SchemaRegistry> {
    Arc::new(
        SchemaRegistry::builder()
            .register(
                VOLUME_TABLE,
                "volumeTable",
                Utf8KeyCodec,
                JsonValueCodec::object("VolumeInfo"),
            )
            .register(
                BUCKET_TABLE,
                "bucketTable",
                Utf8KeyCodec,
                JsonValueCodec::object("BucketInfo"),
            )
            .register(
                KEY_TABLE,
                "keyTable",
                Utf8KeyCodec,
                JsonValueCodec::object("KeyInfo"),
            )
            .register(SEQUENCE_TABLE, "sequenceTable", U64KeyCodec, U64ValueCodec)
            .build()
            .unwrap(),
    )
}

pub fn reference_store() -> Arc<MemoryReferenceStore> {
    Arc::new(MemoryReferenceStore::new())
}

pub fn test_config(name: &str) -> TailerConfig {
    TailerConfig::builder()
        .session_name(name)
        .max_batches_per_read(4)
        .poll_interval_ms(10)
        .emit_metrics(false)
        .build()
        .unwrap()
}

/// Compact view of an event for sequence comparisons.
#[derive(Debug, Clone, PartialEq)]
pub struct Seen {
    pub action: ChangeAction,
    pub key: String,
    pub value: Value,
    pub old_value: Option<Value>,
}

impl Seen {
    pub fn new(
        action: ChangeAction,
        key: &str,
        value: Value,
        old_value: Option<Value>,
    ) -> Self {
        Self {
            action,
            key: key.to_string(),
            value,
            old_value,
        }
    }
}

pub fn seen(events: &[ChangeEvent]) -> Vec<Seen> {
    events
        .iter()
        .map(|e| Seen {
            action: e.action,
            key: e.key.to_string(),
            value: e.value.clone(),
            old_value: e.old_value.clone(),
        })
        .collect()
}

pub fn volume(name: &str, owner: &str) -> Value {
    serde_json::json!({ "volume": name, "owner": owner })
}

pub fn volume_bytes(name: &str, owner: &str) -> Vec<u8> {
    serde_json::to_vec(&volume(name, owner)).unwrap()
}
