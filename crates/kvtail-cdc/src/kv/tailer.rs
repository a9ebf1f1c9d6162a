//! Log cursor / tailer
//!
//! Wraps a [`CommitLogSource`] into a restartable cursor yielding raw
//! batches in commit order. A cursor is lazy and finite per call: once it
//! returns `None` the reader is caught up with the log head, and a later call
//! picks up batches committed since.

use crate::common::{CdcError, Result};
use kvtail_core::{CommitLogSource, LogEntry, SequenceNumber, WriteBatch};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, trace};

/// Opens cursors over a commit log.
#[derive(Clone)]
pub struct LogTailer {
    source: Arc<dyn CommitLogSource>,
    max_batches: usize,
}

impl LogTailer {
    /// `max_batches` bounds how many batches one read pulls from the source.
    pub fn new(source: Arc<dyn CommitLogSource>, max_batches: usize) -> Self {
        Self {
            source,
            max_batches: max_batches.max(1),
        }
    }

    pub fn source(&self) -> &Arc<dyn CommitLogSource> {
        &self.source
    }

    /// Open a cursor yielding batches whose sequence is `>= from`.
    ///
    /// Fails with [`CdcError::CursorExpired`] when `from` is older than the
    /// retained history.
    pub async fn open(&self, from: SequenceNumber) -> Result<LogCursor> {
        let earliest = self.source.earliest_sequence().await?;
        if from < earliest {
            return Err(CdcError::CursorExpired {
                requested: from,
                earliest,
            });
        }

        debug!("Opened log cursor at {} (earliest retained {})", from, earliest);
        Ok(LogCursor {
            source: Arc::clone(&self.source),
            max_batches: self.max_batches,
            read_from: from,
            buffer: VecDeque::new(),
            last_yielded: None,
        })
    }
}

impl std::fmt::Debug for LogTailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogTailer")
            .field("max_batches", &self.max_batches)
            .finish()
    }
}

/// Position in a commit log.
pub struct LogCursor {
    source: Arc<dyn CommitLogSource>,
    max_batches: usize,
    /// Next sequence to request from the source
    read_from: SequenceNumber,
    /// Fetched but not yet yielded
    buffer: VecDeque<LogEntry>,
    last_yielded: Option<SequenceNumber>,
}

impl LogCursor {
    /// Smallest sequence the next yielded batch may have.
    pub fn position(&self) -> SequenceNumber {
        self.buffer
            .front()
            .map(|e| e.sequence)
            .unwrap_or(self.read_from)
    }

    /// Whether the source still retains history at the cursor position.
    pub async fn is_valid(&self) -> Result<bool> {
        if !self.buffer.is_empty() {
            return Ok(true);
        }
        let earliest = self.source.earliest_sequence().await?;
        Ok(self.read_from >= earliest)
    }

    /// Next raw batch, or `None` when caught up.
    pub async fn next_entry(&mut self) -> Result<Option<LogEntry>> {
        if self.buffer.is_empty() {
            self.fill().await?;
        }

        let Some(entry) = self.buffer.pop_front() else {
            return Ok(None);
        };

        if let Some(last) = self.last_yielded {
            if entry.sequence <= last {
                return Err(CdcError::Log(kvtail_core::Error::corrupt(format!(
                    "log returned batch {} after {}",
                    entry.sequence, last
                ))));
            }
        }
        self.last_yielded = Some(entry.sequence);

        Ok(Some(entry))
    }

    /// Next batch, verified and decoded, or `None` when caught up.
    pub async fn next_batch(&mut self) -> Result<Option<WriteBatch>> {
        match self.next_entry().await? {
            Some(entry) => Ok(Some(entry.decode()?)),
            None => Ok(None),
        }
    }

    /// Move the cursor back (or forward) to `to`, dropping buffered batches.
    pub fn rewind(&mut self, to: SequenceNumber) {
        trace!("Rewinding log cursor from {} to {}", self.position(), to);
        self.buffer.clear();
        self.read_from = to;
        self.last_yielded = None;
    }

    async fn fill(&mut self) -> Result<()> {
        let entries = self
            .source
            .read_since(self.read_from, self.max_batches)
            .await?;

        if let Some(last) = entries.last() {
            trace!(
                "Fetched {} batches from {} to {}",
                entries.len(),
                self.read_from,
                last.sequence
            );
            self.read_from = last.next_sequence()?;
        }
        self.buffer.extend(entries);
        Ok(())
    }
}

impl std::fmt::Debug for LogCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogCursor")
            .field("position", &self.position())
            .field("buffered", &self.buffer.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvtail_core::{MemoryCommitLog, TableId, WriteBatchBuilder};

    fn one_put(key: &str) -> WriteBatchBuilder {
        WriteBatchBuilder::new().put_cf(TableId(1), key, "{}")
    }

    fn log_with(n: usize) -> Arc<MemoryCommitLog> {
        let log = Arc::new(MemoryCommitLog::new());
        for i in 0..n {
            log.append(&one_put(&format!("k{}", i))).unwrap();
        }
        log
    }

    #[tokio::test]
    async fn test_cursor_yields_in_order_then_catches_up() {
        let log = log_with(5);
        let tailer = LogTailer::new(log.clone(), 2);
        let mut cursor = tailer.open(SequenceNumber(1)).await.unwrap();

        let mut seen = Vec::new();
        while let Some(entry) = cursor.next_entry().await.unwrap() {
            seen.push(entry.sequence.0);
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
        assert!(cursor.next_entry().await.unwrap().is_none());

        // New commits are picked up by the same cursor
        log.append(&one_put("late")).unwrap();
        let batch = cursor.next_batch().await.unwrap().unwrap();
        assert_eq!(batch.sequence(), SequenceNumber(6));
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn test_open_before_retention_expires() {
        let log = log_with(4);
        log.truncate_before(SequenceNumber(3));
        let tailer = LogTailer::new(log, 10);

        let err = tailer.open(SequenceNumber(2)).await.unwrap_err();
        assert!(err.requires_resync());
        assert!(matches!(
            err,
            CdcError::CursorExpired {
                requested: SequenceNumber(2),
                earliest: SequenceNumber(3)
            }
        ));

        assert!(tailer.open(SequenceNumber(3)).await.is_ok());
    }

    #[tokio::test]
    async fn test_truncation_under_open_cursor() {
        let log = log_with(4);
        let tailer = LogTailer::new(log.clone(), 1);
        let mut cursor = tailer.open(SequenceNumber(1)).await.unwrap();
        assert_eq!(cursor.next_entry().await.unwrap().unwrap().sequence.0, 1);

        log.truncate_before(SequenceNumber(4));
        assert!(!cursor.is_valid().await.unwrap());
        let err = cursor.next_entry().await.unwrap_err();
        assert!(matches!(err, CdcError::CursorExpired { .. }));
    }

    #[tokio::test]
    async fn test_multi_op_batch_advances_past_all_operations() {
        let log = Arc::new(MemoryCommitLog::new());
        log.append(&one_put("a").put_cf(TableId(1), "b", "{}").put_cf(TableId(1), "c", "{}"))
            .unwrap();
        let tailer = LogTailer::new(log.clone(), 10);
        let mut cursor = tailer.open(SequenceNumber(1)).await.unwrap();
        assert_eq!(cursor.next_entry().await.unwrap().unwrap().sequence.0, 1);
        assert!(cursor.next_entry().await.unwrap().is_none());
        assert_eq!(cursor.position(), SequenceNumber(4));

        // Retention dropping exactly the consumed batch keeps the cursor valid
        assert_eq!(log.append(&one_put("d")).unwrap(), SequenceNumber(4));
        log.truncate_before(SequenceNumber(4));
        assert!(cursor.is_valid().await.unwrap());
        assert_eq!(cursor.next_entry().await.unwrap().unwrap().sequence.0, 4);
        assert!(tailer.open(cursor.position()).await.is_ok());
    }

    #[tokio::test]
    async fn test_rewind_restarts_from_observed_position() {
        let log = log_with(3);
        let tailer = LogTailer::new(log, 10);
        let mut cursor = tailer.open(SequenceNumber(1)).await.unwrap();
        while cursor.next_entry().await.unwrap().is_some() {}

        cursor.rewind(SequenceNumber(2));
        assert_eq!(cursor.position(), SequenceNumber(2));
        assert_eq!(cursor.next_entry().await.unwrap().unwrap().sequence.0, 2);
    }
}
