//! Key-value storage for per-identity traffic records.
//!
//! The traffic model only needs point reads and writes keyed by operation
//! identity plus an occasional durable flush, so the backend sits behind the
//! small [`TrafficStore`] trait. Tests and short-lived processes use
//! [`MemoryTrafficStore`]; long-running clients persist to a JSON file with
//! [`JsonFileTrafficStore`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{Result, SchedulerError};

/// Completed-transfer statistics for one operation identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrafficRecord {
    /// Number of successful completions.
    pub count: u64,
    /// Sum of bytes transferred by those completions.
    pub bytes: u64,
}

impl TrafficRecord {
    /// Returns the record with one more completion of `bytes`.
    pub fn with_completion(self, bytes: u64) -> Self {
        Self {
            count: self.count.saturating_add(1),
            bytes: self.bytes.saturating_add(bytes),
        }
    }

    /// Average bytes per completion, or `None` before the first completion.
    pub fn average(&self) -> Option<u64> {
        if self.count == 0 {
            None
        } else {
            Some(self.bytes / self.count)
        }
    }
}

/// Storage backend for traffic records.
pub trait TrafficStore: Send + Sync {
    /// Get the record for an identity. Returns None if nothing was recorded yet.
    fn get(&self, identity: &str) -> Result<Option<TrafficRecord>>;

    /// Insert or overwrite the record for an identity.
    fn put(&self, identity: &str, record: TrafficRecord) -> Result<()>;

    /// Write all records to durable storage.
    fn persist(&self) -> Result<()>;

    /// Returns every stored record, sorted by identity.
    fn records(&self) -> Result<Vec<(String, TrafficRecord)>>;
}

fn lock_error<E: std::fmt::Display>(e: E) -> SchedulerError {
    SchedulerError::Store {
        reason: e.to_string(),
    }
}

/// In-memory store. Records are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryTrafficStore {
    data: RwLock<BTreeMap<String, TrafficRecord>>,
}

impl MemoryTrafficStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TrafficStore for MemoryTrafficStore {
    fn get(&self, identity: &str) -> Result<Option<TrafficRecord>> {
        let data = self.data.read().map_err(lock_error)?;
        Ok(data.get(identity).copied())
    }

    fn put(&self, identity: &str, record: TrafficRecord) -> Result<()> {
        let mut data = self.data.write().map_err(lock_error)?;
        data.insert(identity.to_string(), record);
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        Ok(())
    }

    fn records(&self) -> Result<Vec<(String, TrafficRecord)>> {
        let data = self.data.read().map_err(lock_error)?;
        Ok(data.iter().map(|(k, v)| (k.clone(), *v)).collect())
    }
}

/// Store backed by a JSON object of `identity -> {"count", "bytes"}`.
///
/// The file is read once when opened and rewritten as a whole by
/// [`persist`](TrafficStore::persist). A missing, unreadable or corrupt file
/// opens as an empty store.
#[derive(Debug)]
pub struct JsonFileTrafficStore {
    path: PathBuf,
    data: RwLock<BTreeMap<String, TrafficRecord>>,
}

impl JsonFileTrafficStore {
    /// Opens the store at `path`, loading existing records if the file is valid.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = Self::load(&path);
        debug!(path = %path.display(), records = data.len(), "Opened traffic store");
        Self {
            path,
            data: RwLock::new(data),
        }
    }

    fn load(path: &Path) -> BTreeMap<String, TrafficRecord> {
        let contents = match std::fs::read(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read traffic store, starting empty");
                return BTreeMap::new();
            }
        };
        match serde_json::from_slice(&contents) {
            Ok(data) => data,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt traffic store, starting empty");
                BTreeMap::new()
            }
        }
    }
}

impl TrafficStore for JsonFileTrafficStore {
    fn get(&self, identity: &str) -> Result<Option<TrafficRecord>> {
        let data = self.data.read().map_err(lock_error)?;
        Ok(data.get(identity).copied())
    }

    fn put(&self, identity: &str, record: TrafficRecord) -> Result<()> {
        let mut data = self.data.write().map_err(lock_error)?;
        data.insert(identity.to_string(), record);
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        let encoded = {
            let data = self.data.read().map_err(lock_error)?;
            serde_json::to_vec_pretty(&*data).map_err(|e| SchedulerError::Store {
                reason: e.to_string(),
            })?
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &encoded)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), bytes = encoded.len(), "Persisted traffic store");
        Ok(())
    }

    fn records(&self) -> Result<Vec<(String, TrafficRecord)>> {
        let data = self.data.read().map_err(lock_error)?;
        Ok(data.iter().map(|(k, v)| (k.clone(), *v)).collect())
    }
}
