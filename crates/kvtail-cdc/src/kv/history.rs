//! Per-key history cache
//!
//! Session-scoped record of the last known value of every key the session
//! has touched. Entries are never removed during a session: a delete turns
//! the entry into [`CacheEntry::Tombstoned`], which keeps the last value so
//! later deletes and re-inserts can still report it.
//!
//! Mutations made while a batch is being extracted go to a [`HistoryDelta`]
//! first and reach the cache only when the batch commits.

use crate::common::RecordKey;
use kvtail_core::TableId;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Recorded state of one key.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEntry {
    /// Key currently holds this value
    Live(Value),
    /// Key was deleted; the value it held is retained
    Tombstoned(Value),
}

impl CacheEntry {
    pub fn last_value(&self) -> &Value {
        match self {
            CacheEntry::Live(v) | CacheEntry::Tombstoned(v) => v,
        }
    }

    pub fn into_last_value(self) -> Value {
        match self {
            CacheEntry::Live(v) | CacheEntry::Tombstoned(v) => v,
        }
    }

    pub fn is_tombstoned(&self) -> bool {
        matches!(self, CacheEntry::Tombstoned(_))
    }
}

type TableEntries = HashMap<RecordKey, CacheEntry>;

/// Session history of every touched key.
#[derive(Debug, Default)]
pub struct HistoryCache {
    entries: HashMap<TableId, TableEntries>,
    reference_misses: HashMap<TableId, HashSet<RecordKey>>,
}

impl HistoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, table: TableId, key: &RecordKey) -> Option<&CacheEntry> {
        self.entries.get(&table).and_then(|t| t.get(key))
    }

    /// Record a write: the key is live with `value`.
    pub fn record_put(&mut self, table: TableId, key: RecordKey, value: Value) {
        self.entries
            .entry(table)
            .or_default()
            .insert(key, CacheEntry::Live(value));
    }

    /// Record a delete.
    ///
    /// Without `value_at_deletion` the existing last value is retained; a key
    /// with no entry and no value stays absent.
    pub fn record_delete(
        &mut self,
        table: TableId,
        key: RecordKey,
        value_at_deletion: Option<Value>,
    ) {
        let value =
            value_at_deletion.or_else(|| self.get(table, &key).map(|e| e.last_value().clone()));
        if let Some(value) = value {
            self.entries
                .entry(table)
                .or_default()
                .insert(key, CacheEntry::Tombstoned(value));
        }
    }

    /// Seed the first known value from the reference store.
    ///
    /// Returns false (and changes nothing) if the key already has an entry.
    pub fn seed(&mut self, table: TableId, key: RecordKey, value: Value) -> bool {
        let entries = self.entries.entry(table).or_default();
        if entries.contains_key(&key) {
            return false;
        }
        entries.insert(key, CacheEntry::Live(value));
        true
    }

    /// Remember that the reference store has no value for `key`.
    pub fn mark_reference_miss(&mut self, table: TableId, key: RecordKey) {
        self.reference_misses.entry(table).or_default().insert(key);
    }

    pub fn is_reference_miss(&self, table: TableId, key: &RecordKey) -> bool {
        self.reference_misses
            .get(&table)
            .is_some_and(|keys| keys.contains(key))
    }

    /// Fold a committed batch delta into the cache.
    pub fn apply(&mut self, delta: HistoryDelta) {
        for (table, entries) in delta.entries {
            self.entries.entry(table).or_default().extend(entries);
        }
    }

    /// Number of keys with history
    pub fn len(&self) -> usize {
        self.entries.values().map(|t| t.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tombstoned_count(&self) -> usize {
        self.entries
            .values()
            .flat_map(|t| t.values())
            .filter(|e| e.is_tombstoned())
            .count()
    }

    /// Drop all history; used when a new independent session starts.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.reference_misses.clear();
    }
}

/// Uncommitted cache mutations of one batch.
///
/// Reads see the delta first, then the underlying cache.
#[derive(Debug, Default)]
pub struct HistoryDelta {
    entries: HashMap<TableId, TableEntries>,
}

impl HistoryDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<'a>(
        &'a self,
        base: &'a HistoryCache,
        table: TableId,
        key: &RecordKey,
    ) -> Option<&'a CacheEntry> {
        self.entries
            .get(&table)
            .and_then(|t| t.get(key))
            .or_else(|| base.get(table, key))
    }

    pub fn record_put(&mut self, table: TableId, key: RecordKey, value: Value) {
        self.entries
            .entry(table)
            .or_default()
            .insert(key, CacheEntry::Live(value));
    }

    pub fn record_delete(
        &mut self,
        base: &HistoryCache,
        table: TableId,
        key: RecordKey,
        value_at_deletion: Option<Value>,
    ) {
        let value = value_at_deletion
            .or_else(|| self.get(base, table, &key).map(|e| e.last_value().clone()));
        if let Some(value) = value {
            self.entries
                .entry(table)
                .or_default()
                .insert(key, CacheEntry::Tombstoned(value));
        }
    }

    /// Number of keys touched by the batch
    pub fn len(&self) -> usize {
        self.entries.values().map(|t| t.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const T: TableId = TableId(1);

    fn key(s: &str) -> RecordKey {
        RecordKey::text(s)
    }

    #[test]
    fn test_put_then_delete_retains_value() {
        let mut cache = HistoryCache::new();
        cache.record_put(T, key("k"), json!(1));
        assert_eq!(cache.get(T, &key("k")), Some(&CacheEntry::Live(json!(1))));

        cache.record_delete(T, key("k"), None);
        let entry = cache.get(T, &key("k")).unwrap();
        assert!(entry.is_tombstoned());
        assert_eq!(entry.last_value(), &json!(1));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.tombstoned_count(), 1);
    }

    #[test]
    fn test_delete_without_history_is_noop() {
        let mut cache = HistoryCache::new();
        cache.record_delete(T, key("ghost"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_seed_only_when_absent() {
        let mut cache = HistoryCache::new();
        assert!(cache.seed(T, key("k"), json!("ref")));
        assert!(!cache.seed(T, key("k"), json!("other")));
        assert_eq!(cache.get(T, &key("k")).unwrap().last_value(), &json!("ref"));
    }

    #[test]
    fn test_tables_are_separate_namespaces() {
        let mut cache = HistoryCache::new();
        cache.record_put(TableId(1), key("k"), json!(1));
        assert!(cache.get(TableId(2), &key("k")).is_none());
    }

    #[test]
    fn test_delta_reads_through_and_applies() {
        let mut cache = HistoryCache::new();
        cache.record_put(T, key("a"), json!("a0"));

        let mut delta = HistoryDelta::new();
        assert_eq!(delta.get(&cache, T, &key("a")).unwrap().last_value(), &json!("a0"));

        delta.record_put(T, key("b"), json!("b1"));
        delta.record_delete(&cache, T, key("a"), None);
        assert!(delta.get(&cache, T, &key("a")).unwrap().is_tombstoned());

        // Not visible until applied
        assert!(cache.get(T, &key("b")).is_none());
        assert!(!cache.get(T, &key("a")).unwrap().is_tombstoned());

        cache.apply(delta);
        assert_eq!(cache.get(T, &key("b")), Some(&CacheEntry::Live(json!("b1"))));
        assert_eq!(
            cache.get(T, &key("a")),
            Some(&CacheEntry::Tombstoned(json!("a0")))
        );
    }

    #[test]
    fn test_clear_forgets_misses() {
        let mut cache = HistoryCache::new();
        cache.mark_reference_miss(T, key("k"));
        assert!(cache.is_reference_miss(T, &key("k")));
        assert!(!cache.is_reference_miss(TableId(T.0 + 1), &key("k")));
        cache.record_put(T, key("j"), json!(1));

        cache.clear();
        assert!(cache.is_empty());
        assert!(!cache.is_reference_miss(T, &key("k")));
    }
}
