//! Reference store adapter
//!
//! Read-only access to a secondary store holding the current decoded value
//! of a key. The extractor consults it only to seed the first known state of
//! a key that has no history in the session yet.
//!
//! Absence is `Ok(None)`; an `Err` always means the lookup itself failed and
//! may be retried.

use crate::common::RecordKey;
use crate::kv::schema::TableSchema;
use async_trait::async_trait;
use kvtail_core::TableId;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// A failed (retryable) reference lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ReferenceStoreError(String);

impl ReferenceStoreError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Read access to the reference store.
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    /// Current value of `key` in `table`, or `None` when absent.
    async fn lookup(
        &self,
        table: &TableSchema,
        key: &RecordKey,
    ) -> std::result::Result<Option<Value>, ReferenceStoreError>;
}

/// Reference store that never holds a value.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyReferenceStore;

#[async_trait]
impl ReferenceStore for EmptyReferenceStore {
    async fn lookup(
        &self,
        _table: &TableSchema,
        _key: &RecordKey,
    ) -> std::result::Result<Option<Value>, ReferenceStoreError> {
        Ok(None)
    }
}

/// In-memory reference store with lookup accounting and fault injection.
#[derive(Debug, Default)]
pub struct MemoryReferenceStore {
    values: RwLock<HashMap<(TableId, RecordKey), Value>>,
    lookups: AtomicU64,
    pending_failures: AtomicU64,
}

impl MemoryReferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, table: TableId, key: impl Into<RecordKey>, value: Value) {
        self.values.write().insert((table, key.into()), value);
    }

    pub fn remove(&self, table: TableId, key: &RecordKey) -> Option<Value> {
        self.values.write().remove(&(table, key.clone()))
    }

    /// Make the next `count` lookups fail.
    pub fn fail_next(&self, count: u64) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Total lookups served, including failed ones
    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

#[async_trait]
impl ReferenceStore for MemoryReferenceStore {
    async fn lookup(
        &self,
        table: &TableSchema,
        key: &RecordKey,
    ) -> std::result::Result<Option<Value>, ReferenceStoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ReferenceStoreError::new(format!(
                "injected failure reading {} from '{}'",
                key,
                table.name()
            )));
        }

        Ok(self.values.read().get(&(table.id(), key.clone())).cloned())
    }
}
