//! # Tailing Sessions
//!
//! A [`TailingSession`] owns one cursor, one history cache and one extractor,
//! and moves batches from the commit log to an [`EventSink`] strictly in
//! order:
//!
//! ```text
//! read batch ──▶ extract (staged) ──▶ sink.apply ──▶ commit history ──▶ advance cursor
//!                     │                    │
//!                     └── abort ───────────┴── error: nothing advances, batch retried
//! ```
//!
//! The committed cursor only moves after the sink accepted a batch, so the
//! sink can persist its own resume point atomically with the events (see
//! [`CheckpointingSink`]).

use crate::common::{
    CdcError, ChangeEvent, Checkpoint, CheckpointBackend, ExtractorMetrics, Result,
    SharedCheckpointBackend,
};
use crate::kv::config::TailerConfig;
use crate::kv::extractor::{ExtractedBatch, Extractor};
use crate::kv::reference::ReferenceStore;
use crate::kv::schema::SchemaRegistry;
use crate::kv::tailer::{LogCursor, LogTailer};
use async_trait::async_trait;
use kvtail_core::{CommitLogSource, SequenceNumber};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Downstream consumer of extracted events.
///
/// `apply` receives every batch exactly once per successful delivery, in
/// commit order, including batches that produced no events. Returning an
/// error leaves the session positioned before `batch.sequence`.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn apply(&self, batch: &ExtractedBatch) -> Result<()>;
}

/// Sink collecting batches in memory, with fault injection.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    batches: Mutex<Vec<(SequenceNumber, Vec<ChangeEvent>)>>,
    pending_failures: AtomicU64,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `count` batches.
    pub fn fail_next(&self, count: u64) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Accepted batches in delivery order
    pub fn batches(&self) -> Vec<(SequenceNumber, Vec<ChangeEvent>)> {
        self.batches.lock().clone()
    }

    /// All accepted events, flattened
    pub fn events(&self) -> Vec<ChangeEvent> {
        self.batches
            .lock()
            .iter()
            .flat_map(|(_, events)| events.iter().cloned())
            .collect()
    }

    pub fn last_sequence(&self) -> Option<SequenceNumber> {
        self.batches.lock().last().map(|(seq, _)| *seq)
    }

    pub fn len(&self) -> usize {
        self.batches.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.lock().is_empty()
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn apply(&self, batch: &ExtractedBatch) -> Result<()> {
        let failing = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CdcError::sink(batch.sequence, "injected failure"));
        }

        self.batches
            .lock()
            .push((batch.sequence, batch.events.clone()));
        Ok(())
    }
}

/// Sink wrapper that saves a checkpoint after every applied batch.
pub struct CheckpointingSink<S> {
    inner: S,
    backend: SharedCheckpointBackend,
    key: String,
}

impl<S: EventSink> CheckpointingSink<S> {
    pub fn new(inner: S, backend: SharedCheckpointBackend, key: impl Into<String>) -> Self {
        Self {
            inner,
            backend,
            key: key.into(),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: EventSink> EventSink for CheckpointingSink<S> {
    async fn apply(&self, batch: &ExtractedBatch) -> Result<()> {
        self.inner.apply(batch).await?;
        let checkpoint = Checkpoint::new(self.key.clone(), batch.sequence, batch.next_sequence);
        self.backend.save(&self.key, checkpoint).await
    }
}

/// Outcome of draining the log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    /// Batches delivered to the sink
    pub batches: u64,
    /// Events delivered to the sink
    pub events: u64,
    /// Last batch the sink accepted during this run
    pub last_committed: Option<SequenceNumber>,
}

/// One tailing session over a commit log.
pub struct TailingSession {
    config: TailerConfig,
    tailer: LogTailer,
    extractor: Extractor,
    metrics: Arc<ExtractorMetrics>,
    cursor: Option<LogCursor>,
    committed: Option<SequenceNumber>,
    next_position: SequenceNumber,
}

impl TailingSession {
    pub fn new(
        source: Arc<dyn CommitLogSource>,
        registry: Arc<SchemaRegistry>,
        reference: Arc<dyn ReferenceStore>,
        config: TailerConfig,
    ) -> Result<Self> {
        config.validate()?;

        let mut metrics = ExtractorMetrics::new(config.session_name.clone());
        if !config.emit_metrics {
            metrics = metrics.without_export();
        }
        let metrics = Arc::new(metrics);

        Ok(Self {
            tailer: LogTailer::new(source, config.max_batches_per_read),
            extractor: Extractor::new(registry, reference).with_metrics(Arc::clone(&metrics)),
            metrics,
            cursor: None,
            committed: None,
            next_position: config.start_sequence,
            config,
        })
    }

    /// Continue after the batch a checkpoint records as applied.
    pub fn resume_from(mut self, checkpoint: &Checkpoint) -> Self {
        self.position_at(checkpoint);
        self
    }

    /// Position the session from the stored checkpoint of this session name.
    pub async fn restore_checkpoint(
        &mut self,
        backend: &dyn CheckpointBackend,
    ) -> Result<Option<Checkpoint>> {
        let checkpoint = backend.load(&self.config.session_name).await?;
        if let Some(cp) = &checkpoint {
            info!(
                "Session '{}' resuming after checkpoint {}",
                self.config.session_name, cp.sequence
            );
            self.position_at(cp);
        }
        Ok(checkpoint)
    }

    fn position_at(&mut self, checkpoint: &Checkpoint) {
        self.committed = Some(checkpoint.sequence);
        self.next_position = checkpoint.resume_position();
        self.cursor = None;
    }

    pub fn config(&self) -> &TailerConfig {
        &self.config
    }

    /// Last batch accepted by the sink, if any
    pub fn committed(&self) -> Option<SequenceNumber> {
        self.committed
    }

    /// First sequence the next read may return
    pub fn next_position(&self) -> SequenceNumber {
        self.next_position
    }

    pub fn metrics(&self) -> &Arc<ExtractorMetrics> {
        &self.metrics
    }

    pub fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    /// Start a new independent session reading from `from`.
    ///
    /// All history is discarded; the next batches are classified as if
    /// nothing had been observed before.
    pub fn reset(&mut self, from: SequenceNumber) {
        info!(
            "Session '{}' reset to {} (was at {})",
            self.config.session_name, from, self.next_position
        );
        self.extractor.reset();
        self.cursor = None;
        self.committed = None;
        self.next_position = from;
    }

    /// Deliver batches until caught up with the log head.
    ///
    /// Stops at the first error. Nothing after the last accepted batch is
    /// committed, so calling again retries the failed batch.
    pub async fn run_once(&mut self, sink: &dyn EventSink) -> Result<SessionReport> {
        let mut report = SessionReport::default();
        while self.step(sink, &mut report).await? {}

        if report.batches > 0 {
            debug!(
                "Session '{}' delivered {} batches ({} events), committed {:?}",
                self.config.session_name, report.batches, report.events, self.committed
            );
        }
        Ok(report)
    }

    /// Tail until a shutdown signal arrives, polling once caught up.
    ///
    /// Retriable errors are logged and the batch is retried on the next
    /// poll; any other error ends the run.
    pub async fn run(
        &mut self,
        sink: &dyn EventSink,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<SessionReport> {
        info!(
            "Session '{}' tailing from {}",
            self.config.session_name, self.next_position
        );
        let mut total = SessionReport::default();

        loop {
            loop {
                if shutdown_requested(&mut shutdown_rx) {
                    self.log_stop(&total);
                    return Ok(total);
                }
                match self.step(sink, &mut total).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) if e.is_retriable() => {
                        warn!(
                            "Session '{}' will retry after {}: {}",
                            self.config.session_name, self.next_position, e
                        );
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    self.log_stop(&total);
                    return Ok(total);
                }
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }
    }

    /// Deliver one batch. Returns false when caught up.
    async fn step(&mut self, sink: &dyn EventSink, report: &mut SessionReport) -> Result<bool> {
        // An errored cursor is dropped; the next step reopens it at the
        // committed position.
        let mut cursor = match self.cursor.take() {
            Some(cursor) => cursor,
            None => self
                .tailer
                .open(self.next_position)
                .await
                .map_err(|e| {
                    self.metrics.record_error(&e);
                    e
                })?,
        };

        let entry = match cursor.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                self.cursor = Some(cursor);
                return Ok(false);
            }
            Err(e) => {
                self.metrics.record_error(&e);
                return Err(e);
            }
        };

        let batch = self.extractor.process_raw(&entry).await?;

        if let Err(e) = sink.apply(&batch).await {
            warn!(
                "Sink rejected batch {} ({} events): {}",
                batch.sequence,
                batch.events.len(),
                e
            );
            self.extractor.rollback();
            self.metrics.record_error(&e);
            return Err(e);
        }

        self.extractor.commit(batch.sequence)?;
        self.committed = Some(batch.sequence);
        self.next_position = batch.next_sequence;
        self.cursor = Some(cursor);

        report.batches += 1;
        report.events += batch.events.len() as u64;
        report.last_committed = Some(batch.sequence);
        Ok(true)
    }

    fn log_stop(&self, total: &SessionReport) {
        info!(
            "Session '{}' stopping after {} batches ({} events)",
            self.config.session_name, total.batches, total.events
        );
    }
}

fn shutdown_requested(rx: &mut broadcast::Receiver<()>) -> bool {
    !matches!(
        rx.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    )
}

impl std::fmt::Debug for TailingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TailingSession")
            .field("session", &self.config.session_name)
            .field("committed", &self.committed)
            .field("next_position", &self.next_position)
            .finish()
    }
}
