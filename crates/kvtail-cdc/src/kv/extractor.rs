//! # Change Event Extractor
//!
//! Turns ordered batches of raw operations into classified [`ChangeEvent`]s.
//!
//! For each operation, in order:
//!
//! 1. Resolve the table schema from the column family id
//! 2. Decode the key
//! 3. Find the prior state of the key: session history first, then (once per
//!    key) the reference store
//! 4. Classify:
//!    - Delete with no prior state: dropped, nothing recorded
//!    - Delete with prior state (live or tombstoned): `Delete` carrying the
//!      last value
//!    - Put/Merge: `Create` when there is no prior state or the key is
//!      tombstoned, `Update` otherwise
//!
//! ## Commit protocol
//!
//! History changes made by a batch are staged. [`Extractor::commit`] folds
//! them into the session cache once the caller has durably handed the events
//! downstream; [`Extractor::rollback`] (or simply processing another batch)
//! discards them. An aborted batch therefore leaves the cache untouched and
//! can be retried from the same cursor with identical results.
//!
//! ```ignore
//! let mut extractor = Extractor::new(registry, reference);
//! match extractor.process_batch(seq, &ops).await {
//!     Ok(batch) => {
//!         sink.apply(&batch).await?;
//!         extractor.commit(batch.sequence)?;
//!     }
//!     Err(abort) => return Err(abort.into_error()),
//! }
//! ```

use crate::common::{CdcError, ChangeAction, ChangeEvent, ExtractorMetrics, RecordKey, Result};
use crate::kv::codec::CodecError;
use crate::kv::history::{CacheEntry, HistoryCache, HistoryDelta};
use crate::kv::reference::ReferenceStore;
use crate::kv::schema::{SchemaRegistry, TableSchema};
use kvtail_core::{LogEntry, OperationKind, RawOperation, SequenceNumber, WriteBatch};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Events extracted from one batch, not yet committed.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedBatch {
    pub sequence: SequenceNumber,
    /// Where the next batch starts: one sequence number per operation
    pub next_sequence: SequenceNumber,
    pub events: Vec<ChangeEvent>,
}

impl ExtractedBatch {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// A batch that failed part-way through.
///
/// `partial_events` are the events classified before the failing operation.
/// They are valid but uncommitted; the cursor must not move past
/// `sequence`.
#[derive(Debug, Error)]
#[error("batch {sequence} aborted after {} events: {error}", .partial_events.len())]
pub struct BatchAbort {
    pub sequence: SequenceNumber,
    #[source]
    pub error: CdcError,
    pub partial_events: Vec<ChangeEvent>,
}

impl BatchAbort {
    pub fn into_error(self) -> CdcError {
        self.error
    }
}

impl From<BatchAbort> for CdcError {
    fn from(abort: BatchAbort) -> Self {
        abort.error
    }
}

#[derive(Debug)]
struct PendingBatch {
    sequence: SequenceNumber,
    delta: HistoryDelta,
    actions: Vec<ChangeAction>,
    dropped_deletes: u64,
}

/// Stateful event extractor for one tailing session.
///
/// Single-owner: batches must be fed in commit order by one task.
pub struct Extractor {
    registry: Arc<SchemaRegistry>,
    reference: Arc<dyn ReferenceStore>,
    cache: HistoryCache,
    pending: Option<PendingBatch>,
    metrics: Option<Arc<ExtractorMetrics>>,
}

impl Extractor {
    pub fn new(registry: Arc<SchemaRegistry>, reference: Arc<dyn ReferenceStore>) -> Self {
        Self {
            registry,
            reference,
            cache: HistoryCache::new(),
            pending: None,
            metrics: None,
        }
    }

    /// Report counters to `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<ExtractorMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Committed session history
    pub fn cache(&self) -> &HistoryCache {
        &self.cache
    }

    /// Sequence of the batch awaiting commit, if any
    pub fn pending_sequence(&self) -> Option<SequenceNumber> {
        self.pending.as_ref().map(|p| p.sequence)
    }

    /// Start a new independent session: all history is discarded.
    pub fn reset(&mut self) {
        debug!(
            "Resetting extractor history ({} keys)",
            self.cache.len()
        );
        self.cache.clear();
        self.pending = None;
    }

    /// Classify every operation of one batch.
    ///
    /// Any uncommitted result of a previous call is discarded first.
    pub async fn process_batch(
        &mut self,
        sequence: SequenceNumber,
        operations: &[RawOperation],
    ) -> std::result::Result<ExtractedBatch, BatchAbort> {
        if let Some(stale) = self.pending.take() {
            debug!("Discarding uncommitted batch {}", stale.sequence);
        }

        let registry = Arc::clone(&self.registry);
        let mut pending = PendingBatch {
            sequence,
            delta: HistoryDelta::new(),
            actions: Vec::with_capacity(operations.len()),
            dropped_deletes: 0,
        };
        let mut events = Vec::with_capacity(operations.len());

        for op in operations {
            match self.classify(&registry, sequence, op, &mut pending).await {
                Ok(Some(event)) => {
                    pending.actions.push(event.action);
                    events.push(event);
                }
                Ok(None) => {}
                Err(error) => {
                    warn!(
                        "Aborting batch {} after {} of {} operations: {}",
                        sequence,
                        events.len(),
                        operations.len(),
                        error
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.record_abort(&error);
                    }
                    return Err(BatchAbort {
                        sequence,
                        error,
                        partial_events: events,
                    });
                }
            }
        }

        debug!(
            "Extracted {} events from batch {} ({} operations, {} keys touched)",
            events.len(),
            sequence,
            operations.len(),
            pending.delta.len()
        );
        self.pending = Some(pending);

        Ok(ExtractedBatch {
            sequence,
            next_sequence: sequence.advance(operations.len() as u64),
            events,
        })
    }

    /// Classify a decoded write batch.
    pub async fn process_write_batch(
        &mut self,
        batch: &WriteBatch,
    ) -> std::result::Result<ExtractedBatch, BatchAbort> {
        self.process_batch(batch.sequence(), batch.operations()).await
    }

    /// Verify, decode and classify a raw commit-log entry.
    pub async fn process_raw(
        &mut self,
        entry: &LogEntry,
    ) -> std::result::Result<ExtractedBatch, BatchAbort> {
        let batch = entry.decode().map_err(|e| {
            let error = CdcError::from(e);
            warn!("Undecodable batch at {}: {}", entry.sequence, error);
            if let Some(metrics) = &self.metrics {
                metrics.record_abort(&error);
            }
            BatchAbort {
                sequence: entry.sequence,
                error,
                partial_events: Vec::new(),
            }
        })?;
        self.process_write_batch(&batch).await
    }

    /// Fold the staged history of batch `sequence` into the session cache.
    pub fn commit(&mut self, sequence: SequenceNumber) -> Result<()> {
        let pending = match self.pending.take() {
            Some(p) if p.sequence == sequence => p,
            Some(p) => {
                let staged = p.sequence;
                self.pending = Some(p);
                return Err(CdcError::invalid_state(format!(
                    "cannot commit batch {} while batch {} is staged",
                    sequence, staged
                )));
            }
            None => {
                return Err(CdcError::invalid_state(format!(
                    "no staged batch to commit at {}",
                    sequence
                )))
            }
        };

        self.cache.apply(pending.delta);

        if let Some(metrics) = &self.metrics {
            for action in pending.actions {
                metrics.record_event(action);
            }
            for _ in 0..pending.dropped_deletes {
                metrics.record_dropped_delete();
            }
            metrics.record_commit(sequence);
        }

        trace!("Committed batch {}", sequence);
        Ok(())
    }

    /// Discard the staged batch, if any. Returns whether one was staged.
    pub fn rollback(&mut self) -> bool {
        match self.pending.take() {
            Some(p) => {
                debug!("Rolled back batch {}", p.sequence);
                true
            }
            None => false,
        }
    }

    /// Process and immediately commit a batch.
    pub async fn extract(
        &mut self,
        sequence: SequenceNumber,
        operations: &[RawOperation],
    ) -> Result<Vec<ChangeEvent>> {
        let batch = self.process_batch(sequence, operations).await?;
        self.commit(sequence)?;
        Ok(batch.events)
    }

    async fn classify(
        &mut self,
        registry: &SchemaRegistry,
        sequence: SequenceNumber,
        op: &RawOperation,
        pending: &mut PendingBatch,
    ) -> Result<Option<ChangeEvent>> {
        let schema = registry
            .resolve(op.table)
            .ok_or(CdcError::UnknownTable {
                table: op.table,
                sequence,
            })?;

        let key = schema.decode_key(&op.key).map_err(|source| CdcError::Decode {
            table: schema.name().to_string(),
            sequence,
            key: None,
            source,
        })?;

        let prior = self
            .prior_state(schema, &key, sequence, &pending.delta)
            .await?;
        let table = schema.id();

        match op.kind {
            OperationKind::Delete => {
                let Some(entry) = prior else {
                    trace!(
                        "Dropping delete of {} in '{}' at {}: no history",
                        key,
                        schema.name(),
                        sequence
                    );
                    pending.dropped_deletes += 1;
                    return Ok(None);
                };

                let last = entry.into_last_value();
                pending
                    .delta
                    .record_delete(&self.cache, table, key.clone(), Some(last.clone()));
                Ok(Some(ChangeEvent::delete(
                    table,
                    schema.name(),
                    key,
                    last,
                    sequence,
                )))
            }
            OperationKind::Put | OperationKind::Merge => {
                let value = op
                    .value
                    .as_deref()
                    .ok_or_else(|| CodecError::new(format!("{} without a value", op.kind)))
                    .and_then(|bytes| schema.decode_value(bytes))
                    .map_err(|source| CdcError::Decode {
                        table: schema.name().to_string(),
                        sequence,
                        key: Some(key.to_string()),
                        source,
                    })?;

                pending
                    .delta
                    .record_put(table, key.clone(), value.clone());

                let event = match prior {
                    Some(CacheEntry::Live(old)) => {
                        ChangeEvent::update(table, schema.name(), key, value, old, sequence)
                    }
                    Some(CacheEntry::Tombstoned(old)) => {
                        ChangeEvent::create(table, schema.name(), key, value, Some(old), sequence)
                    }
                    None => ChangeEvent::create(table, schema.name(), key, value, None, sequence),
                };
                Ok(Some(event))
            }
        }
    }

    /// State of `key` before the current operation.
    ///
    /// Staged history wins over committed history. With neither, the
    /// reference store is asked once; hits are seeded into the session cache
    /// and misses are remembered.
    async fn prior_state(
        &mut self,
        schema: &TableSchema,
        key: &RecordKey,
        sequence: SequenceNumber,
        delta: &HistoryDelta,
    ) -> Result<Option<CacheEntry>> {
        let table = schema.id();
        if let Some(entry) = delta.get(&self.cache, table, key) {
            return Ok(Some(entry.clone()));
        }
        if self.cache.is_reference_miss(table, key) {
            return Ok(None);
        }

        let found = self
            .reference
            .lookup(schema, key)
            .await
            .map_err(|source| CdcError::ReferenceStore {
                table: schema.name().to_string(),
                key: key.to_string(),
                sequence,
                source,
            })?;

        if let Some(metrics) = &self.metrics {
            metrics.record_reference_lookup(found.is_some());
        }

        match found {
            Some(value) => {
                trace!("Seeded {} in '{}' from reference store", key, schema.name());
                self.cache.seed(table, key.clone(), value.clone());
                Ok(Some(CacheEntry::Live(value)))
            }
            None => {
                self.cache.mark_reference_miss(table, key.clone());
                Ok(None)
            }
        }
    }
}

impl std::fmt::Debug for Extractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extractor")
            .field("tables", &self.registry.len())
            .field("cached_keys", &self.cache.len())
            .field("pending", &self.pending_sequence())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::codec::{JsonValueCodec, Utf8KeyCodec};
    use crate::kv::reference::MemoryReferenceStore;
    use kvtail_core::{TableId, WriteBatchBuilder};
    use serde_json::json;

    const VOLUMES: TableId = TableId(1);

    fn registry() -> Arc<SchemaRegistry> {
        Arc::new(
            SchemaRegistry::builder()
                .register(
                    VOLUMES,
                    "volumeTable",
                    Utf8KeyCodec,
                    JsonValueCodec::object("VolumeInfo"),
                )
                .build()
                .unwrap(),
        )
    }

    fn put(key: &str, value: serde_json::Value) -> RawOperation {
        RawOperation::put(VOLUMES, key.to_string(), value.to_string())
    }

    fn delete(key: &str) -> RawOperation {
        RawOperation::delete(VOLUMES, key.to_string())
    }

    #[tokio::test]
    async fn test_first_put_creates() {
        let mut extractor = Extractor::new(registry(), Arc::new(MemoryReferenceStore::new()));
        let v1 = json!({"volume": "vol1"});

        let events = extractor
            .extract(SequenceNumber(1), &[put("/vol1", v1.clone())])
            .await
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, ChangeAction::Create);
        assert_eq!(events[0].value, v1);
        assert_eq!(events[0].old_value, None);
        assert_eq!(events[0].sequence, SequenceNumber(1));
    }

    #[tokio::test]
    async fn test_delete_without_history_is_dropped() {
        let mut extractor = Extractor::new(registry(), Arc::new(MemoryReferenceStore::new()));
        let events = extractor
            .extract(SequenceNumber(1), &[delete("/ghost")])
            .await
            .unwrap();
        assert!(events.is_empty());
        assert!(extractor.cache().is_empty());
    }

    #[tokio::test]
    async fn test_uncommitted_batch_does_not_touch_cache() {
        let mut extractor = Extractor::new(registry(), Arc::new(MemoryReferenceStore::new()));
        let batch = extractor
            .process_batch(SequenceNumber(1), &[put("/vol1", json!({"v": 1}))])
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(extractor.pending_sequence(), Some(SequenceNumber(1)));
        assert!(extractor.cache().is_empty());

        assert!(extractor.rollback());
        assert!(!extractor.rollback());

        // Same input classifies the same way again
        let again = extractor
            .process_batch(SequenceNumber(1), &[put("/vol1", json!({"v": 1}))])
            .await
            .unwrap();
        assert_eq!(again, batch);
        extractor.commit(SequenceNumber(1)).unwrap();
        assert_eq!(extractor.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_commit_requires_matching_batch() {
        let mut extractor = Extractor::new(registry(), Arc::new(MemoryReferenceStore::new()));
        assert!(matches!(
            extractor.commit(SequenceNumber(1)),
            Err(CdcError::InvalidState(_))
        ));

        extractor
            .process_batch(SequenceNumber(5), &[put("/vol1", json!({}))])
            .await
            .unwrap();
        assert!(extractor.commit(SequenceNumber(4)).is_err());
        // Mismatched commit keeps the staged batch
        assert_eq!(extractor.pending_sequence(), Some(SequenceNumber(5)));
        extractor.commit(SequenceNumber(5)).unwrap();
    }

    #[tokio::test]
    async fn test_missing_value_is_decode_error() {
        let mut extractor = Extractor::new(registry(), Arc::new(MemoryReferenceStore::new()));
        let op = RawOperation {
            kind: OperationKind::Put,
            table: VOLUMES,
            key: "/vol1".into(),
            value: None,
        };
        let abort = extractor
            .process_batch(SequenceNumber(3), &[op])
            .await
            .unwrap_err();
        assert!(matches!(abort.error, CdcError::Decode { .. }));
        assert_eq!(abort.error.sequence(), Some(SequenceNumber(3)));
    }

    #[tokio::test]
    async fn test_process_raw_entry() {
        let mut extractor = Extractor::new(registry(), Arc::new(MemoryReferenceStore::new()));
        let data = WriteBatchBuilder::new()
            .put_cf(VOLUMES, "/vol1", br#"{"volume":"vol1"}"#)
            .delete_cf(VOLUMES, "/vol1")
            .build(SequenceNumber(10));
        let entry = LogEntry::new(SequenceNumber(10), data);

        let batch = extractor.process_raw(&entry).await.unwrap();
        let actions: Vec<_> = batch.events.iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![ChangeAction::Create, ChangeAction::Delete]);
        assert_eq!(batch.next_sequence, SequenceNumber(12));

        let mut corrupt = entry.clone();
        corrupt.checksum ^= 1;
        let abort = extractor.process_raw(&corrupt).await.unwrap_err();
        assert!(matches!(abort.error, CdcError::Log(_)));
        assert!(abort.partial_events.is_empty());
    }

    #[tokio::test]
    async fn test_metrics_count_committed_work_only() {
        let metrics = Arc::new(ExtractorMetrics::new("test"));
        let mut extractor = Extractor::new(registry(), Arc::new(MemoryReferenceStore::new()))
            .with_metrics(Arc::clone(&metrics));

        extractor
            .process_batch(SequenceNumber(1), &[put("/a", json!({}))])
            .await
            .unwrap();
        assert_eq!(metrics.snapshot().events(), 0);

        extractor.commit(SequenceNumber(1)).unwrap();
        extractor
            .extract(SequenceNumber(2), &[delete("/b")])
            .await
            .unwrap();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.creates, 1);
        assert_eq!(snapshot.dropped_deletes, 1);
        assert_eq!(snapshot.batches, 2);
        assert_eq!(snapshot.committed_sequence, 2);
        assert_eq!(snapshot.reference_misses, 2);
    }
}
