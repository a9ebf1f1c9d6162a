//! Schema registry
//!
//! Static mapping from column family to the codecs that decode its keys and
//! values. The registry is built once at startup, is immutable afterwards,
//! and is shared by reference (`Arc<SchemaRegistry>`) with every session.

use crate::common::{CdcError, RecordKey, Result};
use crate::kv::codec::{CodecResult, KeyCodec, ValueCodec};
use kvtail_core::TableId;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Decoding schema of one table.
#[derive(Clone)]
pub struct TableSchema {
    id: TableId,
    name: String,
    key_codec: Arc<dyn KeyCodec>,
    value_codec: Arc<dyn ValueCodec>,
}

impl TableSchema {
    pub fn new(
        id: TableId,
        name: impl Into<String>,
        key_codec: impl KeyCodec + 'static,
        value_codec: impl ValueCodec + 'static,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            key_codec: Arc::new(key_codec),
            value_codec: Arc::new(value_codec),
        }
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared key type
    pub fn key_type(&self) -> &str {
        self.key_codec.type_name()
    }

    /// Declared value type
    pub fn value_type(&self) -> &str {
        self.value_codec.type_name()
    }

    pub fn decode_key(&self, bytes: &[u8]) -> CodecResult<RecordKey> {
        self.key_codec.decode(bytes)
    }

    pub fn decode_value(&self, bytes: &[u8]) -> CodecResult<Value> {
        self.value_codec.decode(bytes)
    }

    pub fn encode_key(&self, key: &RecordKey) -> CodecResult<Vec<u8>> {
        self.key_codec.encode(key)
    }

    pub fn encode_value(&self, value: &Value) -> CodecResult<Vec<u8>> {
        self.value_codec.encode(value)
    }
}

impl fmt::Debug for TableSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableSchema")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("key_type", &self.key_type())
            .field("value_type", &self.value_type())
            .finish()
    }
}

/// Immutable table registry keyed by column family id.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    tables: HashMap<TableId, TableSchema>,
    names: HashMap<String, TableId>,
}

impl SchemaRegistry {
    pub fn builder() -> SchemaRegistryBuilder {
        SchemaRegistryBuilder::default()
    }

    /// Look up the schema for a column family id taken from the log.
    pub fn resolve(&self, table: TableId) -> Option<&TableSchema> {
        self.tables.get(&table)
    }

    /// Look up a table by its registered name.
    pub fn by_name(&self, name: &str) -> Option<&TableSchema> {
        self.names.get(name).and_then(|id| self.tables.get(id))
    }

    pub fn contains(&self, table: TableId) -> bool {
        self.tables.contains_key(&table)
    }

    /// Registered tables, in no particular order
    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Builder for [`SchemaRegistry`].
#[derive(Default)]
pub struct SchemaRegistryBuilder {
    tables: Vec<TableSchema>,
}

impl SchemaRegistryBuilder {
    /// Register a table schema.
    pub fn table(mut self, schema: TableSchema) -> Self {
        self.tables.push(schema);
        self
    }

    /// Register a table from its parts.
    pub fn register(
        self,
        id: TableId,
        name: impl Into<String>,
        key_codec: impl KeyCodec + 'static,
        value_codec: impl ValueCodec + 'static,
    ) -> Self {
        self.table(TableSchema::new(id, name, key_codec, value_codec))
    }

    /// Build the registry. Duplicate ids or names are rejected.
    pub fn build(self) -> Result<SchemaRegistry> {
        let mut registry = SchemaRegistry::default();

        for schema in self.tables {
            if schema.name.is_empty() {
                return Err(CdcError::config(format!(
                    "table {} has an empty name",
                    schema.id
                )));
            }
            if registry.tables.contains_key(&schema.id) {
                return Err(CdcError::config(format!(
                    "duplicate registration for {}",
                    schema.id
                )));
            }
            if registry.names.contains_key(&schema.name) {
                return Err(CdcError::config(format!(
                    "duplicate table name '{}'",
                    schema.name
                )));
            }

            debug!(
                "Registered table '{}' ({}): {} -> {}",
                schema.name,
                schema.id,
                schema.key_type(),
                schema.value_type()
            );
            registry.names.insert(schema.name.clone(), schema.id);
            registry.tables.insert(schema.id, schema);
        }

        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::codec::{JsonValueCodec, U64KeyCodec, U64ValueCodec, Utf8KeyCodec};

    fn registry() -> SchemaRegistry {
        SchemaRegistry::builder()
            .register(
                TableId(1),
                "volumeTable",
                Utf8KeyCodec,
                JsonValueCodec::object("VolumeInfo"),
            )
            .register(
                TableId(2),
                "keyTable",
                Utf8KeyCodec,
                JsonValueCodec::object("KeyInfo"),
            )
            .register(TableId(5), "tokenTable", U64KeyCodec, U64ValueCodec)
            .build()
            .unwrap()
    }

    #[test]
    fn test_resolve_by_id_and_name() {
        let registry = registry();
        assert_eq!(registry.len(), 3);

        let keys = registry.resolve(TableId(2)).unwrap();
        assert_eq!(keys.name(), "keyTable");
        assert!(registry.resolve(TableId(99)).is_none());

        assert_eq!(registry.by_name("tokenTable").unwrap().id(), TableId(5));
        assert!(registry.by_name("missing").is_none());
    }

    #[test]
    fn test_declared_types() {
        let registry = registry();
        let keys = registry.by_name("keyTable").unwrap();
        assert_eq!(keys.key_type(), "String");
        assert_eq!(keys.value_type(), "KeyInfo");

        let tokens = registry.by_name("tokenTable").unwrap();
        assert_eq!(tokens.key_type(), "u64");
        assert_eq!(tokens.value_type(), "u64");
    }

    #[test]
    fn test_registration_order_is_irrelevant() {
        let reversed = SchemaRegistry::builder()
            .register(TableId(5), "tokenTable", U64KeyCodec, U64ValueCodec)
            .register(
                TableId(1),
                "volumeTable",
                Utf8KeyCodec,
                JsonValueCodec::object("VolumeInfo"),
            )
            .build()
            .unwrap();
        assert_eq!(reversed.resolve(TableId(1)).unwrap().name(), "volumeTable");
        assert_eq!(reversed.resolve(TableId(5)).unwrap().name(), "tokenTable");
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let dup_id = SchemaRegistry::builder()
            .register(TableId(1), "a", Utf8KeyCodec, JsonValueCodec::new("A"))
            .register(TableId(1), "b", Utf8KeyCodec, JsonValueCodec::new("B"))
            .build();
        assert!(matches!(dup_id, Err(CdcError::Config(_))));

        let dup_name = SchemaRegistry::builder()
            .register(TableId(1), "a", Utf8KeyCodec, JsonValueCodec::new("A"))
            .register(TableId(2), "a", Utf8KeyCodec, JsonValueCodec::new("A"))
            .build();
        assert!(matches!(dup_name, Err(CdcError::Config(_))));
    }
}
