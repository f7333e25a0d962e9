//! Cleanup run checkpoints
//!
//! A paused or failed cleanup run records the next unclaimed row offset so
//! a later run resumes where work stopped instead of re-spending AI budget
//! from row zero. One checkpoint per order, deleted when a run sees the
//! end of the manifest.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mprep_common::{Error, Result};

/// Fixed filename prefix. The order id is the only variable part of a
/// checkpoint's identity.
pub const CHECKPOINT_PREFIX: &str = "cleanup-checkpoint-";

/// Persistent marker for where the next cleanup run should start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Next unclaimed row offset.
    pub offset: u64,
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn at(offset: u64) -> Self {
        Self { offset, saved_at: Utc::now() }
    }
}

/// Storage for per-order checkpoints.
pub trait CheckpointStore: Send + Sync {
    fn load(&self, order_id: i64) -> Result<Option<Checkpoint>>;
    fn save(&self, order_id: i64, checkpoint: &Checkpoint) -> Result<()>;
    fn clear(&self, order_id: i64) -> Result<()>;
}

/// JSON file per order under a fixed directory. Writes go through a temp
/// file and rename so a crash mid-write cannot leave a torn checkpoint.
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, order_id: i64) -> PathBuf {
        self.dir.join(format!("{}{}.json", CHECKPOINT_PREFIX, order_id))
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self, order_id: i64) -> Result<Option<Checkpoint>> {
        let path = self.path(order_id);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let checkpoint = serde_json::from_str(&text).map_err(|e| {
            Error::Internal(format!("corrupt checkpoint {}: {}", path.display(), e))
        })?;
        Ok(Some(checkpoint))
    }

    fn save(&self, order_id: i64, checkpoint: &Checkpoint) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path(order_id);
        let tmp = path.with_extension("json.tmp");
        let text = serde_json::to_string_pretty(checkpoint)
            .map_err(|e| Error::Internal(format!("cannot serialize checkpoint: {}", e)))?;
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, &path)?;
        tracing::debug!(order_id, offset = checkpoint.offset, path = %path.display(), "Checkpoint saved");
        Ok(())
    }

    fn clear(&self, order_id: i64) -> Result<()> {
        let path = self.path(order_id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    map: Mutex<HashMap<i64, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self, order_id: i64) -> Result<Option<Checkpoint>> {
        let map = self
            .map
            .lock()
            .map_err(|_| Error::Internal("checkpoint map poisoned".to_string()))?;
        Ok(map.get(&order_id).cloned())
    }

    fn save(&self, order_id: i64, checkpoint: &Checkpoint) -> Result<()> {
        let mut map = self
            .map
            .lock()
            .map_err(|_| Error::Internal("checkpoint map poisoned".to_string()))?;
        map.insert(order_id, checkpoint.clone());
        Ok(())
    }

    fn clear(&self, order_id: i64) -> Result<()> {
        let mut map = self
            .map
            .lock()
            .map_err(|_| Error::Internal("checkpoint map poisoned".to_string()))?;
        map.remove(&order_id);
        Ok(())
    }
}
