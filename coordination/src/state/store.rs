//! Snapshot storage for swarm state
//!
//! A [`SnapshotBackend`] reads and writes the raw JSON document; the
//! [`SnapshotStore`] on top of it handles encoding and the lenient decoding
//! that lets a partially corrupt file still yield whatever entries are valid.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use super::types::{PartitionSet, PersistedSnapshot, WorktreeEntry};

/// Error type for state store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed snapshot: {0}")]
    Malformed(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Result type for state store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Raw read/write access to the persisted document
#[async_trait]
pub trait SnapshotBackend: Send + Sync {
    /// Read the document. `Ok(None)` means it does not exist yet.
    async fn read(&self) -> StoreResult<Option<String>>;

    /// Replace the document
    async fn write(&self, contents: &str) -> StoreResult<()>;

    /// Human-readable location for log lines
    fn describe(&self) -> String;
}

/// Backend storing the snapshot in a JSON file
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotBackend for JsonFileBackend {
    async fn read(&self) -> StoreResult<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn write(&self, contents: &str) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, contents).await?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-process backend, used by tests and embedders that manage storage
/// themselves
#[derive(Debug, Default)]
pub struct MemoryBackend {
    contents: Mutex<Option<String>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with an existing document
    pub fn with_contents(contents: impl Into<String>) -> Self {
        let backend = Self::default();
        *backend.contents.lock() = Some(contents.into());
        backend
    }

    /// Make subsequent reads fail
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent writes fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Current document, if any
    pub fn contents(&self) -> Option<String> {
        self.contents.lock().clone()
    }

    /// Number of successful writes
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotBackend for MemoryBackend {
    async fn read(&self) -> StoreResult<Option<String>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("read failure injected".to_string()));
        }
        Ok(self.contents.lock().clone())
    }

    async fn write(&self, contents: &str) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("write failure injected".to_string()));
        }
        *self.contents.lock() = Some(contents.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Encode a snapshot as pretty-printed JSON (2-space indent)
pub fn encode_snapshot(snapshot: &PersistedSnapshot) -> StoreResult<String> {
    Ok(serde_json::to_string_pretty(snapshot)?)
}

/// Decode a snapshot, skipping entries with a missing or malformed shape.
///
/// Only a document that is not JSON at all, or whose top level is not an
/// object, is an error.
pub fn decode_snapshot(contents: &str) -> StoreResult<PersistedSnapshot> {
    let root: Value = serde_json::from_str(contents)?;
    let Value::Object(root) = root else {
        return Err(StoreError::Malformed(
            "top-level value is not an object".to_string(),
        ));
    };

    // Merge duplicate worktree keys instead of letting the last one win
    let mut worktrees: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    if let Some(Value::Array(entries)) = root.get("worktreeAgents") {
        for entry in entries {
            let Some(worktree) = entry.get("worktree").and_then(Value::as_str) else {
                debug!("Skipping worktree entry without a worktree key");
                continue;
            };
            let Some(agents) = entry.get("agents").and_then(Value::as_array) else {
                debug!(worktree, "Skipping worktree entry with non-array agents");
                continue;
            };
            let agents: BTreeSet<String> = agents
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
            if agents.is_empty() {
                continue;
            }
            worktrees
                .entry(worktree.to_string())
                .or_default()
                .extend(agents);
        }
    }

    let mut task_partitions = Vec::new();
    if let Some(Value::Array(sets)) = root.get("taskPartitions") {
        for set in sets {
            let Some(partition_id) = set.get("partitionId").and_then(Value::as_str) else {
                debug!("Skipping partition set without a partitionId");
                continue;
            };
            match serde_json::from_value::<PartitionSet>(set.clone()) {
                Ok(set) => task_partitions.push(set),
                Err(e) => debug!(partition_id, "Skipping malformed partition set: {}", e),
            }
        }
    }

    Ok(PersistedSnapshot {
        worktree_agents: worktrees
            .into_iter()
            .map(|(worktree, agents)| WorktreeEntry {
                worktree,
                agents: agents.into_iter().collect(),
            })
            .collect(),
        task_partitions,
    })
}

/// Typed snapshot access over a backend
#[derive(Clone)]
pub struct SnapshotStore {
    backend: Arc<dyn SnapshotBackend>,
}

impl SnapshotStore {
    pub fn new(backend: Arc<dyn SnapshotBackend>) -> Self {
        Self { backend }
    }

    /// Load the snapshot. `Ok(None)` on first run.
    pub async fn load(&self) -> StoreResult<Option<PersistedSnapshot>> {
        match self.backend.read().await? {
            Some(contents) => decode_snapshot(&contents).map(Some),
            None => Ok(None),
        }
    }

    /// Replace the stored snapshot
    pub async fn save(&self, snapshot: &PersistedSnapshot) -> StoreResult<()> {
        let json = encode_snapshot(snapshot)?;
        self.backend.write(&json).await
    }

    /// Where the snapshot lives
    pub fn describe(&self) -> String {
        self.backend.describe()
    }
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore")
            .field("backend", &self.backend.describe())
            .finish()
    }
}
