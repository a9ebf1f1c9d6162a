//! # kvtail-core - Commit-log primitives
//!
//! Storage-side building blocks shared by the kvtail crates:
//!
//! - [`SequenceNumber`] / [`TableId`] - log positions and column families
//! - [`WriteBatch`] / [`WriteBatchBuilder`] - the raw batch wire format
//! - [`CommitLogSource`] - resumable, sequence-numbered access to a commit log
//! - [`MemoryCommitLog`] - in-memory log with an emulated retention window

pub mod error;
pub mod log;
pub mod sequence;
pub mod write_batch;

pub use error::{Error, Result};
pub use log::{CommitLogSource, LogEntry, MemoryCommitLog};
pub use sequence::{SequenceNumber, TableId};
pub use write_batch::{OperationKind, RawOperation, RecordTag, WriteBatch, WriteBatchBuilder};
