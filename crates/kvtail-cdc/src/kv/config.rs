//! Tailing session configuration
//!
//! # Example
//!
//! ```rust,ignore
//! let config = TailerConfig::builder()
//!     .session_name("recon-sync")
//!     .max_batches_per_read(256)
//!     .poll_interval_ms(200)
//!     .build()?;
//! ```

use crate::common::{CdcError, Result};
use kvtail_core::SequenceNumber;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration of one tailing session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TailerConfig {
    /// Session name, used for logs, metrics labels and checkpoint keys
    pub session_name: String,
    /// First sequence to read when no checkpoint exists (default: 1)
    pub start_sequence: SequenceNumber,
    /// Maximum batches pulled from the log per read (default: 128)
    pub max_batches_per_read: usize,
    /// Delay between polls once caught up, in milliseconds (default: 500ms)
    pub poll_interval_ms: u64,
    /// Mirror counters to the `metrics` facade (default: true)
    pub emit_metrics: bool,
}

impl Default for TailerConfig {
    fn default() -> Self {
        Self {
            session_name: "kvtail".to_string(),
            start_sequence: SequenceNumber(1),
            max_batches_per_read: 128,
            poll_interval_ms: 500,
            emit_metrics: true,
        }
    }
}

impl TailerConfig {
    pub fn builder() -> TailerConfigBuilder {
        TailerConfigBuilder::default()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.session_name.is_empty() {
            return Err(CdcError::config("Session name is required"));
        }
        if self.session_name.contains('/') || self.session_name.contains('\\') {
            return Err(CdcError::config(
                "Session name must not contain path separators",
            ));
        }
        if self.max_batches_per_read == 0 {
            return Err(CdcError::config("Max batches per read must be > 0"));
        }
        if self.poll_interval_ms < 10 {
            return Err(CdcError::config("Poll interval must be >= 10ms"));
        }
        Ok(())
    }
}

/// Builder for [`TailerConfig`]
#[derive(Debug, Default)]
pub struct TailerConfigBuilder {
    config: TailerConfig,
}

impl TailerConfigBuilder {
    pub fn session_name(mut self, name: impl Into<String>) -> Self {
        self.config.session_name = name.into();
        self
    }

    /// Set where a session without a checkpoint starts reading
    pub fn start_sequence(mut self, sequence: SequenceNumber) -> Self {
        self.config.start_sequence = sequence;
        self
    }

    pub fn max_batches_per_read(mut self, max: usize) -> Self {
        self.config.max_batches_per_read = max;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn emit_metrics(mut self, enabled: bool) -> Self {
        self.config.emit_metrics = enabled;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<TailerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
