//! Write-batch wire format
//!
//! Raw batches in the commit log use the RocksDB `WriteBatch` representation:
//!
//! ```text
//! +-------------------+-----------------+---------------------------+
//! | sequence (u64 LE) | count (u32 LE)  | records ...               |
//! +-------------------+-----------------+---------------------------+
//!
//! record := tag(u8) [cf_id(varint32)] key(varint32 len + bytes) [value]
//! ```
//!
//! Records tagged as column-family variants carry an explicit column family
//! id; the plain variants target the default column family. `LogData` blobs
//! and `Noop` markers are not counted and never surface as operations.

use crate::{Error, Result, SequenceNumber, TableId};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

/// Header size: sequence(8) + count(4)
pub const WRITE_BATCH_HEADER_SIZE: usize = 12;

/// Longest legal varint32 encoding
const MAX_VARINT32_LEN: usize = 5;

/// Record tags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordTag {
    Deletion = 0x00,
    Value = 0x01,
    Merge = 0x02,
    LogData = 0x03,
    ColumnFamilyDeletion = 0x04,
    ColumnFamilyValue = 0x05,
    ColumnFamilyMerge = 0x06,
    SingleDeletion = 0x07,
    ColumnFamilySingleDeletion = 0x08,
    Noop = 0x0D,
}

impl TryFrom<u8> for RecordTag {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(RecordTag::Deletion),
            0x01 => Ok(RecordTag::Value),
            0x02 => Ok(RecordTag::Merge),
            0x03 => Ok(RecordTag::LogData),
            0x04 => Ok(RecordTag::ColumnFamilyDeletion),
            0x05 => Ok(RecordTag::ColumnFamilyValue),
            0x06 => Ok(RecordTag::ColumnFamilyMerge),
            0x07 => Ok(RecordTag::SingleDeletion),
            0x08 => Ok(RecordTag::ColumnFamilySingleDeletion),
            0x0D => Ok(RecordTag::Noop),
            other => Err(Error::corrupt(format!("unknown record tag 0x{:02x}", other))),
        }
    }
}

impl RecordTag {
    fn has_column_family(&self) -> bool {
        matches!(
            self,
            RecordTag::ColumnFamilyDeletion
                | RecordTag::ColumnFamilyValue
                | RecordTag::ColumnFamilyMerge
                | RecordTag::ColumnFamilySingleDeletion
        )
    }

    fn kind(&self) -> Option<OperationKind> {
        match self {
            RecordTag::Value | RecordTag::ColumnFamilyValue => Some(OperationKind::Put),
            RecordTag::Merge | RecordTag::ColumnFamilyMerge => Some(OperationKind::Merge),
            RecordTag::Deletion
            | RecordTag::ColumnFamilyDeletion
            | RecordTag::SingleDeletion
            | RecordTag::ColumnFamilySingleDeletion => Some(OperationKind::Delete),
            RecordTag::LogData | RecordTag::Noop => None,
        }
    }
}

/// Mutation kind of a raw operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Put,
    Delete,
    Merge,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Put => write!(f, "PUT"),
            OperationKind::Delete => write!(f, "DELETE"),
            OperationKind::Merge => write!(f, "MERGE"),
        }
    }
}

/// A single undecoded mutation from the commit log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOperation {
    pub kind: OperationKind,
    pub table: TableId,
    pub key: Bytes,
    /// Present for Put and Merge
    pub value: Option<Bytes>,
}

impl RawOperation {
    pub fn put(table: TableId, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            kind: OperationKind::Put,
            table,
            key: key.into(),
            value: Some(value.into()),
        }
    }

    pub fn merge(table: TableId, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            kind: OperationKind::Merge,
            table,
            key: key.into(),
            value: Some(value.into()),
        }
    }

    pub fn delete(table: TableId, key: impl Into<Bytes>) -> Self {
        Self {
            kind: OperationKind::Delete,
            table,
            key: key.into(),
            value: None,
        }
    }
}

/// A decoded write batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteBatch {
    sequence: SequenceNumber,
    operations: Vec<RawOperation>,
}

impl WriteBatch {
    pub fn new(sequence: SequenceNumber, operations: Vec<RawOperation>) -> Self {
        Self {
            sequence,
            operations,
        }
    }

    /// Decode a batch from a borrowed buffer.
    pub fn decode(data: &[u8]) -> Result<Self> {
        Self::decode_bytes(Bytes::copy_from_slice(data))
    }

    /// Decode a batch; keys and values are zero-copy slices of `data`.
    pub fn decode_bytes(mut data: Bytes) -> Result<Self> {
        if data.len() < WRITE_BATCH_HEADER_SIZE {
            return Err(Error::corrupt(format!(
                "batch too short: {} bytes",
                data.len()
            )));
        }

        let sequence = SequenceNumber(data.get_u64_le());
        let declared = data.get_u32_le();

        let mut operations = Vec::with_capacity(declared.min(4096) as usize);
        while data.has_remaining() {
            let tag = RecordTag::try_from(data.get_u8())?;

            match tag {
                RecordTag::Noop => continue,
                RecordTag::LogData => {
                    read_slice(&mut data)?;
                    continue;
                }
                _ => {}
            }

            let table = if tag.has_column_family() {
                TableId(read_varint32(&mut data)?)
            } else {
                TableId::DEFAULT
            };

            let key = read_slice(&mut data)?;
            let kind = tag
                .kind()
                .ok_or_else(|| Error::corrupt(format!("tag {:?} carries no operation", tag)))?;
            let value = match kind {
                OperationKind::Put | OperationKind::Merge => Some(read_slice(&mut data)?),
                OperationKind::Delete => None,
            };

            operations.push(RawOperation {
                kind,
                table,
                key,
                value,
            });
        }

        if operations.len() != declared as usize {
            return Err(Error::corrupt(format!(
                "record count mismatch: header says {}, found {}",
                declared,
                operations.len()
            )));
        }

        Ok(Self {
            sequence,
            operations,
        })
    }

    pub fn sequence(&self) -> SequenceNumber {
        self.sequence
    }

    pub fn operations(&self) -> &[RawOperation] {
        &self.operations
    }

    pub fn into_operations(self) -> Vec<RawOperation> {
        self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Sequence number of the batch committed after this one.
    pub fn next_sequence(&self) -> SequenceNumber {
        self.sequence.advance(self.operations.len() as u64)
    }
}

/// Builds the wire representation of a write batch.
///
/// The sequence number is assigned at build time, normally by the log the
/// batch is appended to.
#[derive(Debug, Default, Clone)]
pub struct WriteBatchBuilder {
    records: BytesMut,
    count: u32,
}

impl WriteBatchBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Self {
        self.put_cf(TableId::DEFAULT, key, value)
    }

    pub fn delete(self, key: impl AsRef<[u8]>) -> Self {
        self.delete_cf(TableId::DEFAULT, key)
    }

    pub fn merge(self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Self {
        self.merge_cf(TableId::DEFAULT, key, value)
    }

    pub fn single_delete(mut self, key: impl AsRef<[u8]>) -> Self {
        self.records.put_u8(RecordTag::SingleDeletion as u8);
        put_slice(&mut self.records, key.as_ref());
        self.count += 1;
        self
    }

    pub fn put_cf(
        mut self,
        table: TableId,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> Self {
        self.put_tag(table, RecordTag::Value, RecordTag::ColumnFamilyValue);
        put_slice(&mut self.records, key.as_ref());
        put_slice(&mut self.records, value.as_ref());
        self.count += 1;
        self
    }

    pub fn delete_cf(mut self, table: TableId, key: impl AsRef<[u8]>) -> Self {
        self.put_tag(table, RecordTag::Deletion, RecordTag::ColumnFamilyDeletion);
        put_slice(&mut self.records, key.as_ref());
        self.count += 1;
        self
    }

    pub fn merge_cf(
        mut self,
        table: TableId,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> Self {
        self.put_tag(table, RecordTag::Merge, RecordTag::ColumnFamilyMerge);
        put_slice(&mut self.records, key.as_ref());
        put_slice(&mut self.records, value.as_ref());
        self.count += 1;
        self
    }

    /// Attach an opaque blob; it is carried in the log but not counted.
    pub fn log_data(mut self, blob: impl AsRef<[u8]>) -> Self {
        self.records.put_u8(RecordTag::LogData as u8);
        put_slice(&mut self.records, blob.as_ref());
        self
    }

    /// Number of counted operations
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Serialize with the given starting sequence number.
    pub fn build(&self, sequence: SequenceNumber) -> Bytes {
        let mut buf = BytesMut::with_capacity(WRITE_BATCH_HEADER_SIZE + self.records.len());
        buf.put_u64_le(sequence.0);
        buf.put_u32_le(self.count);
        buf.extend_from_slice(&self.records);
        buf.freeze()
    }

    fn put_tag(&mut self, table: TableId, plain: RecordTag, with_cf: RecordTag) {
        if table == TableId::DEFAULT {
            self.records.put_u8(plain as u8);
        } else {
            self.records.put_u8(with_cf as u8);
            put_varint32(&mut self.records, table.0);
        }
    }
}

fn put_varint32(buf: &mut BytesMut, mut value: u32) {
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

fn put_slice(buf: &mut BytesMut, data: &[u8]) {
    put_varint32(buf, data.len() as u32);
    buf.extend_from_slice(data);
}

fn read_varint32(buf: &mut Bytes) -> Result<u32> {
    let mut result: u32 = 0;
    for i in 0..MAX_VARINT32_LEN {
        if !buf.has_remaining() {
            return Err(Error::corrupt("truncated varint"));
        }
        let byte = buf.get_u8();
        result |= ((byte & 0x7F) as u32) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(result);
        }
    }
    Err(Error::corrupt("varint32 exceeds 5 bytes"))
}

fn read_slice(buf: &mut Bytes) -> Result<Bytes> {
    let len = read_varint32(buf)? as usize;
    if buf.remaining() < len {
        return Err(Error::corrupt(format!(
            "slice of {} bytes exceeds remaining {}",
            len,
            buf.remaining()
        )));
    }
    Ok(buf.split_to(len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_mixed_batch() {
        let volumes = TableId(3);
        let data = WriteBatchBuilder::new()
            .put_cf(volumes, "/vol1", "v1")
            .put("plain", "default-cf")
            .delete_cf(volumes, "/vol1")
            .merge_cf(volumes, "/vol2", "m")
            .single_delete("plain")
            .build(SequenceNumber(100));

        let batch = WriteBatch::decode(&data).unwrap();
        assert_eq!(batch.sequence(), SequenceNumber(100));
        assert_eq!(batch.len(), 5);

        let ops = batch.operations();
        assert_eq!(ops[0], RawOperation::put(volumes, "/vol1", "v1"));
        assert_eq!(ops[1].table, TableId::DEFAULT);
        assert_eq!(ops[2], RawOperation::delete(volumes, "/vol1"));
        assert_eq!(ops[3].kind, OperationKind::Merge);
        assert_eq!(ops[4].kind, OperationKind::Delete);
        assert_eq!(ops[4].value, None);
    }

    #[test]
    fn test_log_data_is_skipped_and_not_counted() {
        let builder = WriteBatchBuilder::new()
            .log_data(b"txn-marker")
            .put_cf(TableId(2), "k", "v");
        assert_eq!(builder.count(), 1);

        let batch = WriteBatch::decode(&builder.build(SequenceNumber(7))).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.operations()[0].key, Bytes::from_static(b"k"));
    }

    #[test]
    fn test_large_column_family_id_varint() {
        let cf = TableId(300_000);
        let data = WriteBatchBuilder::new()
            .put_cf(cf, "k", "v")
            .build(SequenceNumber(1));
        let batch = WriteBatch::decode(&data).unwrap();
        assert_eq!(batch.operations()[0].table, cf);
    }

    #[test]
    fn test_short_header_is_corrupt() {
        let err = WriteBatch::decode(&[0u8; 5]).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
    }

    #[test]
    fn test_truncated_value_is_corrupt() {
        let data = WriteBatchBuilder::new()
            .put_cf(TableId(1), "key", "a-longer-value")
            .build(SequenceNumber(1));
        let truncated = &data[..data.len() - 4];
        assert!(matches!(
            WriteBatch::decode(truncated),
            Err(Error::Corrupt(_))
        ));
    }

    #[test]
    fn test_count_mismatch_is_corrupt() {
        let mut data = BytesMut::from(
            &WriteBatchBuilder::new()
                .put("a", "1")
                .build(SequenceNumber(1))[..],
        );
        // Claim two records where only one is present
        data[8] = 2;
        let err = WriteBatch::decode(&data).unwrap_err();
        assert!(err.to_string().contains("count mismatch"));
    }

    #[test]
    fn test_unknown_tag_is_corrupt() {
        let mut data = BytesMut::new();
        data.put_u64_le(1);
        data.put_u32_le(1);
        data.put_u8(0x42);
        let err = WriteBatch::decode(&data).unwrap_err();
        assert!(err.to_string().contains("0x42"));
    }

    #[test]
    fn test_empty_batch() {
        let data = WriteBatchBuilder::new().build(SequenceNumber(9));
        assert_eq!(data.len(), WRITE_BATCH_HEADER_SIZE);
        let batch = WriteBatch::decode(&data).unwrap();
        assert!(batch.is_empty());
        assert_eq!(batch.sequence(), SequenceNumber(9));
    }
}
