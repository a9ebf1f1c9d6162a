//! # kvtail-cdc - Change Data Capture for embedded key-value stores
//!
//! Tails the commit log of a key-value store and turns raw write batches
//! into typed, ordered change events.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//! │  Commit Log  │───▶│  LogTailer   │───▶│  Extractor   │───▶ EventSink
//! │ (raw batches)│    │  (cursor)    │    │              │
//! └──────────────┘    └──────────────┘    └──────┬───────┘
//!                                               │
//!                      ┌────────────────────────┼────────────────────┐
//!                      ▼                        ▼                    ▼
//!               ┌──────────────┐      ┌────────────────┐   ┌────────────────┐
//!               │SchemaRegistry│      │  HistoryCache  │   │ ReferenceStore │
//!               │   (codecs)   │      │(live/tombstone)│   │ (first values) │
//!               └──────────────┘      └────────────────┘   └────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # async fn example() -> anyhow::Result<()> {
//! use std::sync::Arc;
//! use kvtail_cdc::kv::{
//!     JsonValueCodec, MemoryEventSink, MemoryReferenceStore, SchemaRegistry, TailerConfig,
//!     TailingSession, Utf8KeyCodec,
//! };
//! use kvtail_core::{MemoryCommitLog, TableId};
//!
//! let registry = SchemaRegistry::builder()
//!     .register(TableId(1), "volumeTable", Utf8KeyCodec, JsonValueCodec::object("VolumeInfo"))
//!     .build()?;
//!
//! let log = Arc::new(MemoryCommitLog::new());
//! let mut session = TailingSession::new(
//!     log,
//!     Arc::new(registry),
//!     Arc::new(MemoryReferenceStore::new()),
//!     TailerConfig::default(),
//! )?;
//!
//! let sink = MemoryEventSink::new();
//! let report = session.run_once(&sink).await?;
//! println!("delivered {} events", report.events);
//! # Ok(())
//! # }
//! ```

pub mod common;
pub mod kv;

pub use common::{
    CdcError, ChangeAction, ChangeEvent, Checkpoint, CheckpointBackend, CheckpointStore,
    ErrorCategory, ExtractorMetrics, ExtractorMetricsSnapshot, MemoryCheckpointStore, RecordKey,
    Result,
};
pub use kv::{
    EventSink, Extractor, LogTailer, SchemaRegistry, TableSchema, TailerConfig, TailingSession,
};
