//! # Guest-scoped storage
//!
//! Key/value state the host keeps on behalf of guest contexts, which may not
//! be allowed persistent storage of their own. Each `GuestIdentity` owns one
//! bucket; no identity can see another's. Concurrent writes are not merged:
//! last write wins.
//!
//! When opened with a path, every write flushes the whole store as JSON,
//! keyed by origin URL, and takes effect only once the flush succeeds.

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use weaverpc::GuestIdentity;
use weaverpc::StorageEntries;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    Io(String),
    Corrupt(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "Storage I/O error: {}", msg),
            Self::Corrupt(msg) => write!(f, "Storage file is corrupt: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Per-identity key/value buckets.
#[derive(Clone, Debug, Default)]
pub struct GuestStorage {
    buckets: Arc<DashMap<GuestIdentity, StorageEntries>>,
    path: Option<PathBuf>,
    flush_lock: Arc<Mutex<()>>,
}

impl GuestStorage {
    /// Creates an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a store persisted at `path`, loading it if the file exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let buckets = DashMap::new();

        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let stored: BTreeMap<String, StorageEntries> =
                    serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupt(e.to_string()))?;
                for (origin_url, entries) in stored {
                    let identity = GuestIdentity::from_origin_url(&origin_url)
                        .ok_or_else(|| StorageError::Corrupt(format!("bad origin '{}'", origin_url)))?;
                    buckets.insert(identity, entries);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        debug!(path = %path.display(), buckets = buckets.len(), "opened guest storage");
        Ok(Self {
            buckets: Arc::new(buckets),
            path: Some(path),
            flush_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn get(&self, identity: &GuestIdentity, key: &str) -> Option<Value> {
        self.buckets
            .get(identity)
            .and_then(|bucket| bucket.get(key).cloned())
    }

    /// Returns a snapshot of every entry in the identity's bucket.
    pub fn get_all(&self, identity: &GuestIdentity) -> StorageEntries {
        self.buckets
            .get(identity)
            .map(|bucket| bucket.value().clone())
            .unwrap_or_default()
    }

    pub async fn set(&self, identity: &GuestIdentity, key: String, value: Value) -> Result<()> {
        self.update(identity, |bucket| {
            bucket.insert(key, value);
        })
        .await
    }

    pub async fn remove(&self, identity: &GuestIdentity, key: &str) -> Result<()> {
        self.update(identity, |bucket| {
            bucket.remove(key);
        })
        .await
    }

    /// Drops the identity's whole bucket.
    pub async fn clear(&self, identity: &GuestIdentity) -> Result<()> {
        self.update(identity, |bucket| bucket.clear()).await
    }

    /// Applies `change` to a copy of the identity's bucket, writes the store
    /// with that copy in place, and only then makes the copy visible.
    ///
    /// Updates are serialized, so a failed write leaves both memory and disk
    /// as they were and the file always holds the latest committed state.
    async fn update(&self, identity: &GuestIdentity, change: impl FnOnce(&mut StorageEntries)) -> Result<()> {
        let _guard = self.flush_lock.lock().await;

        let mut bucket = self.get_all(identity);
        change(&mut bucket);

        if let Some(path) = &self.path {
            let mut snapshot: BTreeMap<String, StorageEntries> = self
                .buckets
                .iter()
                .map(|entry| (entry.key().origin_url(), entry.value().clone()))
                .collect();
            if bucket.is_empty() {
                snapshot.remove(&identity.origin_url());
            } else {
                snapshot.insert(identity.origin_url(), bucket.clone());
            }

            let bytes = serde_json::to_vec_pretty(&snapshot).map_err(|e| StorageError::Io(e.to_string()))?;
            tokio::fs::write(path, bytes).await?;
        }

        if bucket.is_empty() {
            self.buckets.remove(identity);
        } else {
            self.buckets.insert(identity.clone(), bucket);
        }
        Ok(())
    }
}
