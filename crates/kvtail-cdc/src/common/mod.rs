//! # Common CDC Types
//!
//! Source-agnostic pieces shared by the extraction pipeline:
//!
//! - [`ChangeEvent`] / [`ChangeAction`] / [`RecordKey`] - classified change events
//! - [`CdcError`] - error taxonomy with retry classification
//! - [`ExtractorMetrics`] - per-session counters mirrored to the metrics facade
//! - [`Checkpoint`] / [`CheckpointBackend`] - persistent resume points

mod checkpoint;
mod error;
mod event;
mod metrics;

pub use checkpoint::*;
pub use error::*;
pub use event::*;
pub use self::metrics::*;
