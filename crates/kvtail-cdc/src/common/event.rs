//! Change event representation
//!
//! A [`ChangeEvent`] is the typed, classified form of one raw log operation.
//! Events are immutable once emitted and carry the sequence number of the
//! batch that produced them, so a downstream consumer can persist its resume
//! point together with the applied events.
//!
//! ```ignore
//! // Re-insert after delete: action resets to Create, history is retained
//! assert_eq!(event.action, ChangeAction::Create);
//! assert_eq!(event.old_value, Some(previous));
//! ```

use crate::common::Result;
use kvtail_core::{SequenceNumber, TableId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Decoded key of a table row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKey {
    /// UTF-8 string key (paths such as `/vol/bucket/key`)
    Text(String),
    /// Unsigned integer key
    Int(u64),
    /// Opaque binary key
    Binary(Vec<u8>),
}

impl RecordKey {
    pub fn text(key: impl Into<String>) -> Self {
        Self::Text(key.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for RecordKey {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for RecordKey {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<u64> for RecordKey {
    fn from(value: u64) -> Self {
        Self::Int(value)
    }
}

/// Longest binary key prefix rendered in logs and errors
const BINARY_DISPLAY_PREFIX: usize = 16;

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::Text(s) => write!(f, "{}", s),
            RecordKey::Int(n) => write!(f, "{}", n),
            RecordKey::Binary(bytes) => {
                write!(f, "0x")?;
                for b in bytes.iter().take(BINARY_DISPLAY_PREFIX) {
                    write!(f, "{:02x}", b)?;
                }
                if bytes.len() > BINARY_DISPLAY_PREFIX {
                    write!(f, "..({} bytes)", bytes.len())?;
                }
                Ok(())
            }
        }
    }
}

/// Classified action of a change event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    /// First write of a key, or re-insert after delete
    Create,
    /// Write over a live value
    Update,
    /// Removal of a key with recorded history
    Delete,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Create => "create",
            ChangeAction::Update => "update",
            ChangeAction::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeAction::Create => write!(f, "CREATE"),
            ChangeAction::Update => write!(f, "UPDATE"),
            ChangeAction::Delete => write!(f, "DELETE"),
        }
    }
}

/// A change to one key, classified against the session's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Operation classification
    pub action: ChangeAction,
    /// Column family the change belongs to
    pub table: TableId,
    /// Registered table name
    pub table_name: String,
    /// Decoded key
    pub key: RecordKey,
    /// New value (Create/Update) or the value at deletion (Delete)
    pub value: Value,
    /// Last known value before this operation, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    /// Sequence number of the batch that produced the event
    pub sequence: SequenceNumber,
}

impl ChangeEvent {
    /// Create a new CREATE event
    pub fn create(
        table: TableId,
        table_name: impl Into<String>,
        key: RecordKey,
        value: Value,
        old_value: Option<Value>,
        sequence: SequenceNumber,
    ) -> Self {
        Self {
            action: ChangeAction::Create,
            table,
            table_name: table_name.into(),
            key,
            value,
            old_value,
            sequence,
        }
    }

    /// Create a new UPDATE event
    pub fn update(
        table: TableId,
        table_name: impl Into<String>,
        key: RecordKey,
        value: Value,
        old_value: Value,
        sequence: SequenceNumber,
    ) -> Self {
        Self {
            action: ChangeAction::Update,
            table,
            table_name: table_name.into(),
            key,
            value,
            old_value: Some(old_value),
            sequence,
        }
    }

    /// Create a new DELETE event
    ///
    /// The deleted value is reported both as `value` and `old_value`.
    pub fn delete(
        table: TableId,
        table_name: impl Into<String>,
        key: RecordKey,
        last_value: Value,
        sequence: SequenceNumber,
    ) -> Self {
        Self {
            action: ChangeAction::Delete,
            table,
            table_name: table_name.into(),
            key,
            old_value: Some(last_value.clone()),
            value: last_value,
            sequence,
        }
    }

    pub fn is_create(&self) -> bool {
        self.action == ChangeAction::Create
    }

    pub fn is_update(&self) -> bool {
        self.action == ChangeAction::Update
    }

    pub fn is_delete(&self) -> bool {
        self.action == ChangeAction::Delete
    }

    /// Serialize to JSON bytes for delivery
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
