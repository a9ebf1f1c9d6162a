//! # Extraction Metrics
//!
//! Lock-free counters for a tailing session.
//!
//! ## Metrics Export
//!
//! Counters are mirrored to the `metrics` crate facade, so any installed
//! recorder (Prometheus, StatsD, ...) picks them up:
//!
//! - `kvtail_cdc_events_total{session, action}`
//! - `kvtail_cdc_dropped_deletes_total{session}`
//! - `kvtail_cdc_reference_lookups_total{session, result}`
//! - `kvtail_cdc_batches_total{session}`
//! - `kvtail_cdc_errors_total{session, code}`
//! - `kvtail_cdc_committed_sequence{session}`
//!
//! ## Usage
//!
//! ```ignore
//! let metrics = ExtractorMetrics::new("replica-a");
//! metrics.record_event(ChangeAction::Create);
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.creates, 1);
//! ```

use crate::common::{CdcError, ChangeAction};
use kvtail_core::SequenceNumber;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Session metrics collector with atomic counters.
#[derive(Debug)]
pub struct ExtractorMetrics {
    session: String,
    start_time: Instant,
    /// Mirror to the `metrics` facade
    export: bool,

    creates: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    dropped_deletes: AtomicU64,

    reference_hits: AtomicU64,
    reference_misses: AtomicU64,

    batches: AtomicU64,
    aborted_batches: AtomicU64,
    errors: AtomicU64,

    committed_sequence: AtomicU64,
}

impl ExtractorMetrics {
    /// Create a new metrics collector.
    pub fn new(session: impl Into<String>) -> Self {
        Self {
            session: session.into(),
            start_time: Instant::now(),
            export: true,
            creates: AtomicU64::new(0),
            updates: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            dropped_deletes: AtomicU64::new(0),
            reference_hits: AtomicU64::new(0),
            reference_misses: AtomicU64::new(0),
            batches: AtomicU64::new(0),
            aborted_batches: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            committed_sequence: AtomicU64::new(0),
        }
    }

    /// Keep counters local; nothing is sent to the `metrics` facade.
    pub fn without_export(mut self) -> Self {
        self.export = false;
        self
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    /// Record an emitted event.
    pub fn record_event(&self, action: ChangeAction) {
        let counter = match action {
            ChangeAction::Create => &self.creates,
            ChangeAction::Update => &self.updates,
            ChangeAction::Delete => &self.deletes,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if self.export {
            metrics::counter!(
                "kvtail_cdc_events_total",
                "session" => self.session.clone(),
                "action" => action.as_str()
            )
            .increment(1);
        }
    }

    /// Record a delete dropped because the key had no history.
    pub fn record_dropped_delete(&self) {
        self.dropped_deletes.fetch_add(1, Ordering::Relaxed);
        if self.export {
            metrics::counter!(
                "kvtail_cdc_dropped_deletes_total",
                "session" => self.session.clone()
            )
            .increment(1);
        }
    }

    /// Record a reference store lookup outcome.
    pub fn record_reference_lookup(&self, hit: bool) {
        if hit {
            self.reference_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.reference_misses.fetch_add(1, Ordering::Relaxed);
        }
        if self.export {
            metrics::counter!(
                "kvtail_cdc_reference_lookups_total",
                "session" => self.session.clone(),
                "result" => if hit { "hit" } else { "miss" }
            )
            .increment(1);
        }
    }

    /// Record a batch committed at `sequence`.
    pub fn record_commit(&self, sequence: SequenceNumber) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.committed_sequence.store(sequence.0, Ordering::Relaxed);

        if self.export {
            metrics::counter!("kvtail_cdc_batches_total", "session" => self.session.clone())
                .increment(1);
            metrics::gauge!(
                "kvtail_cdc_committed_sequence",
                "session" => self.session.clone()
            )
            .set(sequence.0 as f64);
        }
    }

    /// Record an aborted batch.
    pub fn record_abort(&self, error: &CdcError) {
        self.aborted_batches.fetch_add(1, Ordering::Relaxed);
        self.record_error(error);
    }

    /// Record an error.
    pub fn record_error(&self, error: &CdcError) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        if self.export {
            metrics::counter!(
                "kvtail_cdc_errors_total",
                "session" => self.session.clone(),
                "code" => error.error_code()
            )
            .increment(1);
        }
    }

    /// Get a point-in-time snapshot.
    pub fn snapshot(&self) -> ExtractorMetricsSnapshot {
        ExtractorMetricsSnapshot {
            session: self.session.clone(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            creates: self.creates.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            dropped_deletes: self.dropped_deletes.load(Ordering::Relaxed),
            reference_hits: self.reference_hits.load(Ordering::Relaxed),
            reference_misses: self.reference_misses.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            aborted_batches: self.aborted_batches.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            committed_sequence: self.committed_sequence.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time metrics snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractorMetricsSnapshot {
    pub session: String,
    pub uptime_secs: u64,
    pub creates: u64,
    pub updates: u64,
    pub deletes: u64,
    pub dropped_deletes: u64,
    pub reference_hits: u64,
    pub reference_misses: u64,
    pub batches: u64,
    pub aborted_batches: u64,
    pub errors: u64,
    pub committed_sequence: u64,
}

impl ExtractorMetricsSnapshot {
    /// Total events emitted
    pub fn events(&self) -> u64 {
        self.creates + self.updates + self.deletes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_counters() {
        let metrics = ExtractorMetrics::new("test");
        metrics.record_event(ChangeAction::Create);
        metrics.record_event(ChangeAction::Update);
        metrics.record_event(ChangeAction::Update);
        metrics.record_event(ChangeAction::Delete);
        metrics.record_dropped_delete();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.creates, 1);
        assert_eq!(snapshot.updates, 2);
        assert_eq!(snapshot.deletes, 1);
        assert_eq!(snapshot.dropped_deletes, 1);
        assert_eq!(snapshot.events(), 4);
    }

    #[test]
    fn test_commit_and_abort() {
        let metrics = ExtractorMetrics::new("test");
        metrics.record_commit(SequenceNumber(10));
        metrics.record_commit(SequenceNumber(12));
        metrics.record_abort(&CdcError::other("boom"));
        metrics.record_reference_lookup(true);
        metrics.record_reference_lookup(false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.batches, 2);
        assert_eq!(snapshot.committed_sequence, 12);
        assert_eq!(snapshot.aborted_batches, 1);
        assert_eq!(snapshot.errors, 1);
        assert_eq!(snapshot.reference_hits, 1);
        assert_eq!(snapshot.reference_misses, 1);
        assert_eq!(snapshot.session, "test");
    }
}
