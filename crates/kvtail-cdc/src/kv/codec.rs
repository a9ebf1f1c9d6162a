//! Key and value codecs
//!
//! Each registered table pairs a [`KeyCodec`] with a [`ValueCodec`]. Codecs
//! are stateless and shared across sessions. Keys decode to [`RecordKey`];
//! values decode to `serde_json::Value` row images.

use crate::common::RecordKey;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// A payload that does not match its declared type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct CodecError(String);

impl CodecError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

pub type CodecResult<T> = std::result::Result<T, CodecError>;

/// Decodes and encodes table keys.
pub trait KeyCodec: Send + Sync + fmt::Debug {
    /// Declared semantic type of the key
    fn type_name(&self) -> &str;

    fn decode(&self, bytes: &[u8]) -> CodecResult<RecordKey>;

    fn encode(&self, key: &RecordKey) -> CodecResult<Vec<u8>>;
}

/// Decodes and encodes table values.
pub trait ValueCodec: Send + Sync + fmt::Debug {
    /// Declared semantic type of the value
    fn type_name(&self) -> &str;

    fn decode(&self, bytes: &[u8]) -> CodecResult<Value>;

    fn encode(&self, value: &Value) -> CodecResult<Vec<u8>>;
}

/// UTF-8 string keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8KeyCodec;

impl KeyCodec for Utf8KeyCodec {
    fn type_name(&self) -> &str {
        "String"
    }

    fn decode(&self, bytes: &[u8]) -> CodecResult<RecordKey> {
        std::str::from_utf8(bytes)
            .map(|s| RecordKey::Text(s.to_string()))
            .map_err(|e| CodecError::new(format!("invalid UTF-8 key: {}", e)))
    }

    fn encode(&self, key: &RecordKey) -> CodecResult<Vec<u8>> {
        match key {
            RecordKey::Text(s) => Ok(s.as_bytes().to_vec()),
            other => Err(CodecError::new(format!("expected text key, got {:?}", other))),
        }
    }
}

/// Big-endian u64 keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct U64KeyCodec;

impl KeyCodec for U64KeyCodec {
    fn type_name(&self) -> &str {
        "u64"
    }

    fn decode(&self, bytes: &[u8]) -> CodecResult<RecordKey> {
        let raw: [u8; 8] = bytes
            .try_into()
            .map_err(|_| CodecError::new(format!("expected 8-byte key, got {}", bytes.len())))?;
        Ok(RecordKey::Int(u64::from_be_bytes(raw)))
    }

    fn encode(&self, key: &RecordKey) -> CodecResult<Vec<u8>> {
        match key {
            RecordKey::Int(n) => Ok(n.to_be_bytes().to_vec()),
            other => Err(CodecError::new(format!("expected integer key, got {:?}", other))),
        }
    }
}

/// Opaque binary keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesKeyCodec;

impl KeyCodec for BytesKeyCodec {
    fn type_name(&self) -> &str {
        "bytes"
    }

    fn decode(&self, bytes: &[u8]) -> CodecResult<RecordKey> {
        Ok(RecordKey::Binary(bytes.to_vec()))
    }

    fn encode(&self, key: &RecordKey) -> CodecResult<Vec<u8>> {
        match key {
            RecordKey::Binary(b) => Ok(b.clone()),
            RecordKey::Text(s) => Ok(s.as_bytes().to_vec()),
            RecordKey::Int(n) => Ok(n.to_be_bytes().to_vec()),
        }
    }
}

/// JSON-encoded structured values.
///
/// `type_name` names the record type the table stores, e.g. `VolumeInfo`.
#[derive(Debug, Clone)]
pub struct JsonValueCodec {
    type_name: String,
    require_object: bool,
}

impl JsonValueCodec {
    /// Accept any JSON document.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            require_object: false,
        }
    }

    /// Accept only JSON objects (record-shaped values).
    pub fn object(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            require_object: true,
        }
    }
}

impl ValueCodec for JsonValueCodec {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn decode(&self, bytes: &[u8]) -> CodecResult<Value> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| CodecError::new(format!("invalid {} JSON: {}", self.type_name, e)))?;
        if self.require_object && !value.is_object() {
            return Err(CodecError::new(format!(
                "expected {} object",
                self.type_name
            )));
        }
        Ok(value)
    }

    fn encode(&self, value: &Value) -> CodecResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| CodecError::new(e.to_string()))
    }
}

/// UTF-8 string values.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8ValueCodec;

impl ValueCodec for Utf8ValueCodec {
    fn type_name(&self) -> &str {
        "String"
    }

    fn decode(&self, bytes: &[u8]) -> CodecResult<Value> {
        std::str::from_utf8(bytes)
            .map(|s| Value::String(s.to_string()))
            .map_err(|e| CodecError::new(format!("invalid UTF-8 value: {}", e)))
    }

    fn encode(&self, value: &Value) -> CodecResult<Vec<u8>> {
        value
            .as_str()
            .map(|s| s.as_bytes().to_vec())
            .ok_or_else(|| CodecError::new("expected string value"))
    }
}

/// Big-endian u64 values (counters, object ids).
#[derive(Debug, Clone, Copy, Default)]
pub struct U64ValueCodec;

impl ValueCodec for U64ValueCodec {
    fn type_name(&self) -> &str {
        "u64"
    }

    fn decode(&self, bytes: &[u8]) -> CodecResult<Value> {
        let raw: [u8; 8] = bytes
            .try_into()
            .map_err(|_| CodecError::new(format!("expected 8-byte value, got {}", bytes.len())))?;
        Ok(Value::from(u64::from_be_bytes(raw)))
    }

    fn encode(&self, value: &Value) -> CodecResult<Vec<u8>> {
        value
            .as_u64()
            .map(|n| n.to_be_bytes().to_vec())
            .ok_or_else(|| CodecError::new("expected unsigned integer value"))
    }
}
