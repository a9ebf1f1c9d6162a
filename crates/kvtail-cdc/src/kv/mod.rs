//! # Key-Value Commit Log CDC
//!
//! Change data capture over an embedded key-value store's write-ahead log.
//!
//! - [`SchemaRegistry`] - column family to key/value codecs
//! - [`ReferenceStore`] - fallback source for a key's pre-session value
//! - [`HistoryCache`] - per-key last value with tombstones
//! - [`Extractor`] - classifies raw operations into change events
//! - [`LogTailer`] / [`LogCursor`] - ordered, resumable batch reads
//! - [`TailingSession`] - drives the above into an [`EventSink`]

pub mod codec;
pub mod config;
pub mod extractor;
pub mod history;
pub mod reference;
pub mod schema;
pub mod session;
pub mod tailer;

pub use codec::{
    BytesKeyCodec, CodecError, CodecResult, JsonValueCodec, KeyCodec, U64KeyCodec,
    U64ValueCodec, Utf8KeyCodec, Utf8ValueCodec, ValueCodec,
};
pub use config::{TailerConfig, TailerConfigBuilder};
pub use extractor::{BatchAbort, ExtractedBatch, Extractor};
pub use history::{CacheEntry, HistoryCache, HistoryDelta};
pub use reference::{EmptyReferenceStore, MemoryReferenceStore, ReferenceStore, ReferenceStoreError};
pub use schema::{SchemaRegistry, SchemaRegistryBuilder, TableSchema};
pub use session::{CheckpointingSink, EventSink, MemoryEventSink, SessionReport, TailingSession};
pub use tailer::{LogCursor, LogTailer};
