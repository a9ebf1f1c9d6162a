//! Commit-log sources
//!
//! A [`CommitLogSource`] exposes the source engine's transaction log as a
//! sequence of raw serialized write batches, addressable by sequence number.
//! The engine may drop history older than its retention window; reading
//! before the earliest retained sequence fails with
//! [`Error::SequenceExpired`].
//!
//! [`MemoryCommitLog`] is an in-process implementation used for embedding
//! and tests. It assigns sequence numbers the way the engine does: one per
//! counted operation, with a batch addressed by its first sequence number.

use crate::write_batch::{WriteBatch, WriteBatchBuilder, WRITE_BATCH_HEADER_SIZE};
use crate::{Error, Result, SequenceNumber};
use async_trait::async_trait;
use bytes::Bytes;
use crc32fast::Hasher;
use parking_lot::RwLock;
use std::collections::VecDeque;
use tracing::debug;

/// A raw batch as stored in the commit log.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Sequence number of the first operation in the batch
    pub sequence: SequenceNumber,
    /// Serialized write batch
    pub data: Bytes,
    /// CRC32 of `data`
    pub checksum: u32,
}

impl LogEntry {
    pub fn new(sequence: SequenceNumber, data: Bytes) -> Self {
        let checksum = checksum(&data);
        Self {
            sequence,
            data,
            checksum,
        }
    }

    /// Verify the stored checksum.
    pub fn verify(&self) -> Result<()> {
        if checksum(&self.data) != self.checksum {
            return Err(Error::ChecksumMismatch {
                sequence: self.sequence,
            });
        }
        Ok(())
    }

    /// Verify and decode the write batch.
    ///
    /// The sequence number in the batch header must match the log position.
    pub fn decode(&self) -> Result<WriteBatch> {
        self.verify()?;
        let batch = WriteBatch::decode_bytes(self.data.clone())?;
        if batch.sequence() != self.sequence {
            return Err(Error::corrupt(format!(
                "batch header sequence {} does not match log position {}",
                batch.sequence(),
                self.sequence
            )));
        }
        Ok(batch)
    }

    /// Number of counted operations, read from the batch header.
    pub fn operation_count(&self) -> Result<u32> {
        let header = self
            .data
            .get(COUNT_OFFSET..WRITE_BATCH_HEADER_SIZE)
            .ok_or_else(|| {
                Error::corrupt(format!(
                    "batch at {} too short: {} bytes",
                    self.sequence,
                    self.data.len()
                ))
            })?;
        let mut count = [0u8; 4];
        count.copy_from_slice(header);
        Ok(u32::from_le_bytes(count))
    }

    /// Sequence number of the batch committed after this one.
    pub fn next_sequence(&self) -> Result<SequenceNumber> {
        Ok(self.sequence.advance(u64::from(self.operation_count()?)))
    }
}

/// Offset of the record count in the batch header
const COUNT_OFFSET: usize = 8;

fn checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Read access to a source engine's commit log.
#[async_trait]
pub trait CommitLogSource: Send + Sync {
    /// Smallest sequence number a reader may still resume from.
    async fn earliest_sequence(&self) -> Result<SequenceNumber>;

    /// Sequence number of the last committed operation (zero when empty).
    async fn latest_sequence(&self) -> Result<SequenceNumber>;

    /// Read up to `max_batches` batches whose sequence is `>= from`,
    /// in commit order. An empty result means the reader is caught up.
    async fn read_since(&self, from: SequenceNumber, max_batches: usize)
        -> Result<Vec<LogEntry>>;
}

#[derive(Debug)]
struct LogState {
    entries: VecDeque<LogEntry>,
    next_sequence: SequenceNumber,
    retained_from: SequenceNumber,
}

/// In-memory commit log with an emulated retention window.
#[derive(Debug)]
pub struct MemoryCommitLog {
    state: RwLock<LogState>,
}

impl Default for MemoryCommitLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCommitLog {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LogState {
                entries: VecDeque::new(),
                next_sequence: SequenceNumber(1),
                retained_from: SequenceNumber::ZERO,
            }),
        }
    }

    /// Commit a batch and return its sequence number.
    pub fn append(&self, batch: &WriteBatchBuilder) -> Result<SequenceNumber> {
        if batch.is_empty() {
            return Err(Error::Other("cannot commit an empty write batch".into()));
        }

        let mut state = self.state.write();
        let sequence = state.next_sequence;
        state
            .entries
            .push_back(LogEntry::new(sequence, batch.build(sequence)));
        state.next_sequence = sequence.advance(batch.count() as u64);

        debug!(
            "Committed batch at sequence {} ({} ops)",
            sequence,
            batch.count()
        );
        Ok(sequence)
    }

    /// Drop all batches that start before `sequence`.
    ///
    /// Returns the number of batches dropped.
    pub fn truncate_before(&self, sequence: SequenceNumber) -> usize {
        let mut state = self.state.write();
        let mut dropped = 0;
        while state
            .entries
            .front()
            .is_some_and(|entry| entry.sequence < sequence)
        {
            state.entries.pop_front();
            dropped += 1;
        }
        if sequence > state.retained_from {
            state.retained_from = sequence;
        }
        debug!("Truncated {} batches before sequence {}", dropped, sequence);
        dropped
    }

    /// Number of retained batches
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }
}

#[async_trait]
impl CommitLogSource for MemoryCommitLog {
    async fn earliest_sequence(&self) -> Result<SequenceNumber> {
        Ok(self.state.read().retained_from)
    }

    async fn latest_sequence(&self) -> Result<SequenceNumber> {
        let state = self.state.read();
        Ok(SequenceNumber(state.next_sequence.0.saturating_sub(1)))
    }

    async fn read_since(
        &self,
        from: SequenceNumber,
        max_batches: usize,
    ) -> Result<Vec<LogEntry>> {
        let state = self.state.read();
        if from < state.retained_from {
            return Err(Error::SequenceExpired {
                requested: from,
                earliest: state.retained_from,
            });
        }

        let start = state.entries.partition_point(|entry| entry.sequence < from);
        Ok(state
            .entries
            .iter()
            .skip(start)
            .take(max_batches)
            .cloned()
            .collect())
    }
}
