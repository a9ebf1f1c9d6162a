//! # Tailing Checkpoints
//!
//! Persistent resume points for tailing sessions.
//!
//! A checkpoint records the sequence number of the last batch a downstream
//! consumer fully applied, and the position of the batch after it. A batch
//! consumes one sequence number per operation, so the resume position is
//! stored rather than derived.
//!
//! ## Usage
//!
//! ```ignore
//! use kvtail_cdc::common::{Checkpoint, CheckpointStore};
//!
//! let store = CheckpointStore::new("/var/kvtail/checkpoints").await?;
//! store.save("replica-a", Checkpoint::new("replica-a", batch.sequence, batch.next_sequence)).await?;
//!
//! if let Some(cp) = store.load("replica-a").await? {
//!     session = session.resume_from(&cp);
//! }
//! ```

use crate::common::{CdcError, Result};
use kvtail_core::SequenceNumber;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Resume point of a tailing session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Checkpoint {
    /// Session the checkpoint belongs to
    pub session: String,
    /// Last fully applied batch
    pub sequence: SequenceNumber,
    /// First sequence number of the batch after `sequence`
    pub resume_from: SequenceNumber,
    /// Timestamp when checkpoint was created (Unix seconds)
    pub timestamp: u64,
    /// Additional metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Checkpoint {
    pub fn new(
        session: impl Into<String>,
        sequence: SequenceNumber,
        resume_from: SequenceNumber,
    ) -> Self {
        Self {
            session: session.into(),
            sequence,
            resume_from,
            timestamp: current_timestamp(),
            metadata: HashMap::new(),
        }
    }

    /// Add metadata.
    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    /// First sequence number to read when resuming.
    pub fn resume_position(&self) -> SequenceNumber {
        self.resume_from
    }

    /// Get age of checkpoint in seconds.
    pub fn age_secs(&self) -> u64 {
        current_timestamp().saturating_sub(self.timestamp)
    }
}

/// Get current Unix timestamp in seconds.
fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Persistent checkpoint storage.
///
/// Stores checkpoints as JSON files with atomic writes.
pub struct CheckpointStore {
    /// Base directory for checkpoint files
    base_dir: PathBuf,
    /// In-memory cache
    cache: RwLock<HashMap<String, Checkpoint>>,
    /// Whether to fsync after writes
    fsync: bool,
}

impl CheckpointStore {
    /// Create a new checkpoint store.
    pub async fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        Self::with_options(base_dir, true).await
    }

    /// Create checkpoint store with custom options.
    pub async fn with_options(base_dir: impl AsRef<Path>, fsync: bool) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir).await?;

        let store = Self {
            base_dir,
            cache: RwLock::new(HashMap::new()),
            fsync,
        };

        store.load_all().await?;

        Ok(store)
    }

    /// Save a checkpoint.
    pub async fn save(&self, key: &str, checkpoint: Checkpoint) -> Result<()> {
        if key.is_empty() || key.contains('/') || key.contains('\\') {
            return Err(CdcError::config("Invalid checkpoint key"));
        }

        let file_path = self.file_path(key);
        let temp_path = file_path.with_extension("tmp");

        let json = serde_json::to_string_pretty(&checkpoint)
            .map_err(|e| CdcError::serialization(e.to_string()))?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .await?;

        file.write_all(json.as_bytes()).await?;

        if self.fsync {
            file.sync_all().await?;
        }

        // Atomic rename
        fs::rename(&temp_path, &file_path).await?;

        {
            let mut cache = self.cache.write().await;
            cache.insert(key.to_string(), checkpoint.clone());
        }

        debug!("Saved checkpoint for {}: {}", key, checkpoint.sequence);
        Ok(())
    }

    /// Load a checkpoint.
    pub async fn load(&self, key: &str) -> Result<Option<Checkpoint>> {
        {
            let cache = self.cache.read().await;
            if let Some(cp) = cache.get(key) {
                return Ok(Some(cp.clone()));
            }
        }

        let file_path = self.file_path(key);
        if !file_path.exists() {
            return Ok(None);
        }

        let mut file = File::open(&file_path).await?;
        let mut contents = String::new();
        file.read_to_string(&mut contents).await?;

        let checkpoint: Checkpoint = serde_json::from_str(&contents)
            .map_err(|e| CdcError::serialization(e.to_string()))?;

        {
            let mut cache = self.cache.write().await;
            cache.insert(key.to_string(), checkpoint.clone());
        }

        Ok(Some(checkpoint))
    }

    /// Delete a checkpoint.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let file_path = self.file_path(key);

        if file_path.exists() {
            fs::remove_file(&file_path).await?;
        }

        {
            let mut cache = self.cache.write().await;
            cache.remove(key);
        }

        info!("Deleted checkpoint for {}", key);
        Ok(())
    }

    /// List all checkpoint keys.
    pub async fn list(&self) -> Result<Vec<String>> {
        let cache = self.cache.read().await;
        Ok(cache.keys().cloned().collect())
    }

    async fn load_all(&self) -> Result<()> {
        let mut entries = fs::read_dir(&self.base_dir).await?;

        let mut loaded = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    match self.load(stem).await {
                        Ok(Some(_)) => loaded += 1,
                        Ok(None) => {}
                        Err(e) => {
                            warn!("Failed to load checkpoint {}: {}", stem, e);
                        }
                    }
                }
            }
        }

        if loaded > 0 {
            info!("Loaded {} checkpoints from {}", loaded, self.base_dir.display());
        }

        Ok(())
    }

    fn file_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", key))
    }
}

/// In-memory checkpoint tracker (for testing or when persistence isn't needed).
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: RwLock<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn save(&self, key: &str, checkpoint: Checkpoint) -> Result<()> {
        let mut checkpoints = self.checkpoints.write().await;
        checkpoints.insert(key.to_string(), checkpoint);
        Ok(())
    }

    pub async fn load(&self, key: &str) -> Result<Option<Checkpoint>> {
        let checkpoints = self.checkpoints.read().await;
        Ok(checkpoints.get(key).cloned())
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        let mut checkpoints = self.checkpoints.write().await;
        checkpoints.remove(key);
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<String>> {
        let checkpoints = self.checkpoints.read().await;
        Ok(checkpoints.keys().cloned().collect())
    }
}

/// Trait for checkpoint storage backends.
#[async_trait::async_trait]
pub trait CheckpointBackend: Send + Sync {
    async fn save(&self, key: &str, checkpoint: Checkpoint) -> Result<()>;
    async fn load(&self, key: &str) -> Result<Option<Checkpoint>>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn list(&self) -> Result<Vec<String>>;
}

#[async_trait::async_trait]
impl CheckpointBackend for CheckpointStore {
    async fn save(&self, key: &str, checkpoint: Checkpoint) -> Result<()> {
        CheckpointStore::save(self, key, checkpoint).await
    }

    async fn load(&self, key: &str) -> Result<Option<Checkpoint>> {
        CheckpointStore::load(self, key).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        CheckpointStore::delete(self, key).await
    }

    async fn list(&self) -> Result<Vec<String>> {
        CheckpointStore::list(self).await
    }
}

#[async_trait::async_trait]
impl CheckpointBackend for MemoryCheckpointStore {
    async fn save(&self, key: &str, checkpoint: Checkpoint) -> Result<()> {
        MemoryCheckpointStore::save(self, key, checkpoint).await
    }

    async fn load(&self, key: &str) -> Result<Option<Checkpoint>> {
        MemoryCheckpointStore::load(self, key).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        MemoryCheckpointStore::delete(self, key).await
    }

    async fn list(&self) -> Result<Vec<String>> {
        MemoryCheckpointStore::list(self).await
    }
}

/// Shared checkpoint backend.
pub type SharedCheckpointBackend = Arc<dyn CheckpointBackend>;
