//! Explicit owner of the process's coordinator instance
//!
//! Callers that want "one coordinator per process" hold a `SwarmContext`
//! (typically in an `Arc` or a `static OnceLock`) rather than reaching for
//! a hidden global. The first call to [`SwarmContext::coordinator`] binds
//! the directory; later calls return the same instance whatever directory
//! they pass.

use std::path::Path;

use tokio::sync::Mutex;
use tracing::{debug, error, info};

use super::coordinator::{CleanupReport, SwarmCoordinator};
use crate::config::SwarmConfig;

/// Lazily-initialized, resettable coordinator slot
pub struct SwarmContext {
    config: SwarmConfig,
    slot: Mutex<Option<SwarmCoordinator>>,
}

impl SwarmContext {
    pub fn new(config: SwarmConfig) -> Self {
        Self {
            config,
            slot: Mutex::new(None),
        }
    }

    /// Return the coordinator, opening it on first use.
    ///
    /// Concurrent first calls open exactly one coordinator.
    pub async fn coordinator(&self, directory: impl AsRef<Path>) -> SwarmCoordinator {
        let directory = directory.as_ref();
        let mut slot = self.slot.lock().await;

        if let Some(existing) = slot.as_ref() {
            if !existing.is_bound_to(directory) {
                debug!(
                    bound = %existing.directory().display(),
                    requested = %directory.display(),
                    "Coordinator already bound, ignoring requested directory"
                );
            }
            return existing.clone();
        }

        let coordinator = SwarmCoordinator::open(directory, self.config.clone()).await;
        *slot = Some(coordinator.clone());
        coordinator
    }

    /// The coordinator, if one has been opened
    pub async fn current(&self) -> Option<SwarmCoordinator> {
        self.slot.lock().await.clone()
    }

    /// Forget the current coordinator so the next call opens a fresh one.
    ///
    /// The returned instance keeps working for anyone still holding it.
    pub async fn reset(&self) -> Option<SwarmCoordinator> {
        self.slot.lock().await.take()
    }

    /// Flush, clean up and forget the current coordinator
    pub async fn shutdown(&self) -> Option<CleanupReport> {
        let coordinator = self.reset().await?;

        if let Err(e) = coordinator.flush().await {
            error!("Failed to persist swarm state on shutdown: {}", e);
        }
        let report = coordinator.cleanup();
        info!(directory = %coordinator.directory().display(), "Swarm context shut down");
        Some(report)
    }
}

impl Default for SwarmContext {
    fn default() -> Self {
        Self::new(SwarmConfig::from_env())
    }
}

/// Open a standalone coordinator with configuration from the environment
pub async fn create_swarm_coordinator(directory: impl AsRef<Path>) -> SwarmCoordinator {
    SwarmCoordinator::open(directory, SwarmConfig::from_env()).await
}
