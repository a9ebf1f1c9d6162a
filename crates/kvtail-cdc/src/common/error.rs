//! Error types for CDC operations
//!
//! Includes error classification for retry decisions and alerting. Errors
//! carry the offending sequence number, table, and a printable key; raw
//! key/value payloads are never embedded.

use kvtail_core::{SequenceNumber, TableId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::kv::codec::CodecError;
use crate::kv::reference::ReferenceStoreError;

/// Error categories for metrics and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Schema registration problems (unknown column family)
    Configuration,
    /// Key/value payloads that do not decode under their schema
    Schema,
    /// Commit log access (expired cursor, corrupt batch)
    Replication,
    /// Reference store lookups
    Reference,
    /// Downstream event application
    Downstream,
    /// Serialization errors (JSON)
    Serialization,
    /// Local storage (checkpoint files)
    Storage,
    /// Other/unknown errors
    Other,
}

/// CDC-specific errors
#[derive(Error, Debug)]
pub enum CdcError {
    /// A column family in the log has no registered schema
    #[error("Unknown table {table} at sequence {sequence}")]
    UnknownTable {
        table: TableId,
        sequence: SequenceNumber,
    },

    /// A key or value failed to decode under its registered schema
    #[error("Decode error in table '{table}' at sequence {sequence}{}: {source}", key_suffix(.key))]
    Decode {
        table: String,
        sequence: SequenceNumber,
        key: Option<String>,
        #[source]
        source: CodecError,
    },

    /// The reference store lookup failed transiently
    #[error("Reference store error for table '{table}' key {key} at sequence {sequence}: {source}")]
    ReferenceStore {
        table: String,
        key: String,
        sequence: SequenceNumber,
        #[source]
        source: ReferenceStoreError,
    },

    /// Requested resume point is older than retained log history
    #[error("Cursor expired: sequence {requested} is older than earliest retained {earliest}; full resync required")]
    CursorExpired {
        requested: SequenceNumber,
        earliest: SequenceNumber,
    },

    /// Commit log access error
    #[error("Commit log error: {0}")]
    Log(kvtail_core::Error),

    /// Downstream sink rejected a batch
    #[error("Sink error at sequence {sequence}: {message}")]
    Sink {
        sequence: SequenceNumber,
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

fn key_suffix(key: &Option<String>) -> String {
    key.as_ref()
        .map(|k| format!(" key {}", k))
        .unwrap_or_default()
}

impl From<kvtail_core::Error> for CdcError {
    fn from(err: kvtail_core::Error) -> Self {
        match err {
            kvtail_core::Error::SequenceExpired {
                requested,
                earliest,
            } => Self::CursorExpired {
                requested,
                earliest,
            },
            other => Self::Log(other),
        }
    }
}

impl CdcError {
    /// Create a new sink error
    pub fn sink(sequence: SequenceNumber, msg: impl Into<String>) -> Self {
        Self::Sink {
            sequence,
            message: msg.into(),
        }
    }

    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Check if this error is retriable.
    ///
    /// Returns true for transient errors where reprocessing the same batch
    /// from the same cursor may succeed.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::ReferenceStore { .. } => true,
            Self::Sink { .. } => true,

            Self::Log(e) => matches!(
                e,
                kvtail_core::Error::Unavailable(_) | kvtail_core::Error::IoError(_)
            ),

            Self::Io(e) => {
                use std::io::ErrorKind;
                matches!(
                    e.kind(),
                    ErrorKind::ConnectionReset
                        | ErrorKind::ConnectionAborted
                        | ErrorKind::TimedOut
                        | ErrorKind::Interrupted
                )
            }

            Self::UnknownTable { .. }
            | Self::Decode { .. }
            | Self::CursorExpired { .. }
            | Self::Config(_)
            | Self::Serialization(_)
            | Self::Json(_)
            | Self::InvalidState(_)
            | Self::Other(_) => false,
        }
    }

    /// Whether the caller must fall back to a full resynchronisation.
    pub fn requires_resync(&self) -> bool {
        matches!(self, Self::CursorExpired { .. })
    }

    /// Sequence number of the offending batch, when known.
    pub fn sequence(&self) -> Option<SequenceNumber> {
        match self {
            Self::UnknownTable { sequence, .. }
            | Self::Decode { sequence, .. }
            | Self::ReferenceStore { sequence, .. }
            | Self::Sink { sequence, .. } => Some(*sequence),
            Self::CursorExpired { requested, .. } => Some(*requested),
            Self::Log(kvtail_core::Error::ChecksumMismatch { sequence }) => Some(*sequence),
            _ => None,
        }
    }

    /// Get the error category for metrics and alerting.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnknownTable { .. } => ErrorCategory::Configuration,
            Self::Config(_) => ErrorCategory::Configuration,
            Self::Decode { .. } => ErrorCategory::Schema,
            Self::ReferenceStore { .. } => ErrorCategory::Reference,
            Self::CursorExpired { .. } => ErrorCategory::Replication,
            Self::Log(_) => ErrorCategory::Replication,
            Self::Sink { .. } => ErrorCategory::Downstream,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::Json(_) => ErrorCategory::Serialization,
            Self::Io(_) => ErrorCategory::Storage,
            Self::InvalidState(_) => ErrorCategory::Other,
            Self::Other(_) => ErrorCategory::Other,
        }
    }

    /// Get a metric-safe error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownTable { .. } => "unknown_table",
            Self::Decode { .. } => "decode_error",
            Self::ReferenceStore { .. } => "reference_store_error",
            Self::CursorExpired { .. } => "cursor_expired",
            Self::Log(_) => "log_error",
            Self::Sink { .. } => "sink_error",
            Self::Config(_) => "config_error",
            Self::Serialization(_) => "serialization_error",
            Self::Json(_) => "json_error",
            Self::Io(_) => "io_error",
            Self::InvalidState(_) => "invalid_state",
            Self::Other(_) => "unknown",
        }
    }
}

/// Result type for CDC operations
pub type Result<T> = std::result::Result<T, CdcError>;
