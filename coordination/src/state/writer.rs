//! Write-coalescing persistence queue
//!
//! Mutators call [`PersistQueue::mark_dirty`], which schedules at most one
//! background write at a time. Every write, background or explicit, runs
//! under a single async lock, so the file is never written concurrently.
//! The snapshot is taken only after that lock is held, so a coalesced write
//! always carries the latest state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use super::store::{SnapshotStore, StoreResult};
use super::types::PersistedSnapshot;

/// Something that can produce the durable subset of its state
pub trait SnapshotSource: Send + Sync + 'static {
    fn snapshot(&self) -> PersistedSnapshot;
}

/// Serialized, coalescing writer for a [`SnapshotStore`]
#[derive(Debug)]
pub struct PersistQueue {
    store: SnapshotStore,
    pending: AtomicBool,
    write_lock: Mutex<()>,
    writes: AtomicU64,
}

impl PersistQueue {
    pub fn new(store: SnapshotStore) -> Self {
        Self {
            store,
            pending: AtomicBool::new(false),
            write_lock: Mutex::new(()),
            writes: AtomicU64::new(0),
        }
    }

    /// Request a background write.
    ///
    /// No-op while one is already pending. Outside a Tokio runtime nothing is
    /// scheduled and the queue stays idle, so the next in-runtime call or
    /// flush picks the change up. Errors are logged, never returned.
    pub fn mark_dirty<S: SnapshotSource>(self: &Arc<Self>, source: Arc<S>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(
                target_store = %self.store.describe(),
                "No async runtime; change is written by the next scheduled write or flush"
            );
            return;
        };

        if self.pending.swap(true, Ordering::AcqRel) {
            return;
        }

        let queue = Arc::clone(self);
        runtime.spawn(async move {
            if let Err(e) = queue.write(source.as_ref()).await {
                error!(
                    target_store = %queue.store.describe(),
                    "Background persistence failed: {}",
                    e
                );
            }
        });
    }

    /// Write now, after any in-flight write, and report the outcome
    pub async fn flush<S: SnapshotSource + ?Sized>(&self, source: &S) -> StoreResult<()> {
        self.write(source).await
    }

    /// Whether a background write has been requested but not started
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Number of successful writes so far
    pub fn writes_completed(&self) -> u64 {
        self.writes.load(Ordering::Acquire)
    }

    async fn write<S: SnapshotSource + ?Sized>(&self, source: &S) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        self.pending.store(false, Ordering::Release);

        let snapshot = source.snapshot();
        match self.store.save(&snapshot).await {
            Ok(()) => {
                let n = self.writes.fetch_add(1, Ordering::AcqRel) + 1;
                debug!(
                    target_store = %self.store.describe(),
                    worktrees = snapshot.worktree_agents.len(),
                    partitions = snapshot.task_partitions.len(),
                    writes = n,
                    "State persisted"
                );
                Ok(())
            }
            Err(e) => {
                error!(target_store = %self.store.describe(), "Failed to persist state: {}", e);
                Err(e)
            }
        }
    }
}
