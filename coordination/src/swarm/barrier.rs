//! Barrier synchronization
//!
//! ```text
//! created ──(signals accumulate)──▶ completed(all_ready)
//!    │
//!    ├──(timeout fires)──────────▶ completed(timeout)
//!    └──(cleanup)────────────────▶ completed(shutdown)
//! ```
//!
//! Any agent id may signal; unexpected ids count toward the ready total.

use std::future::IntoFuture;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize, Serializer};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::outcome::{serialize_rejection, CompletionReason};
use crate::events::BarrierEvent;

/// Result delivered to whoever awaits a barrier
pub type BarrierResult = Result<BarrierOutcome, BarrierError>;

/// Successful barrier completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BarrierOutcome {
    pub barrier_id: String,
    pub success: bool,
    /// Agents in the order they signalled
    pub ready_agents: Vec<String>,
    pub completed_at: DateTime<Utc>,
    pub reason: CompletionReason,
}

/// Failure delivered to whoever awaits a barrier
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BarrierError {
    #[error("Barrier {barrier_id} failed: {reason}")]
    Failed {
        barrier_id: String,
        reason: CompletionReason,
        ready_agents: Vec<String>,
    },

    #[error("Barrier {0} was dropped before completing")]
    Dropped(String),
}

impl BarrierError {
    /// The failure reason, if the barrier completed at all
    pub fn reason(&self) -> Option<CompletionReason> {
        match self {
            BarrierError::Failed { reason, .. } => Some(*reason),
            BarrierError::Dropped(_) => None,
        }
    }
}

/// Why a signal was not accepted.
///
/// These are ordinary race outcomes, not misuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SignalRejection {
    #[error("not_found")]
    NotFound,

    #[error("already_completed")]
    AlreadyCompleted,
}

impl SignalRejection {
    pub fn code(&self) -> &'static str {
        match self {
            SignalRejection::NotFound => "not_found",
            SignalRejection::AlreadyCompleted => "already_completed",
        }
    }
}

impl Serialize for SignalRejection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize_rejection(self.code(), serializer)
    }
}

/// Arrival counts after an accepted signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BarrierProgress {
    pub barrier_id: String,
    pub ready: usize,
    pub total: usize,
}

impl BarrierProgress {
    pub fn is_complete(&self) -> bool {
        self.ready >= self.total
    }
}

/// Pending completion of a barrier. Await it directly or call [`wait`](Self::wait).
#[derive(Debug)]
pub struct BarrierWait {
    barrier_id: String,
    receiver: oneshot::Receiver<BarrierResult>,
}

impl BarrierWait {
    pub(crate) fn new(barrier_id: String, receiver: oneshot::Receiver<BarrierResult>) -> Self {
        Self {
            barrier_id,
            receiver,
        }
    }

    pub fn barrier_id(&self) -> &str {
        &self.barrier_id
    }

    /// Wait for the barrier to complete
    pub async fn wait(self) -> BarrierResult {
        match self.receiver.await {
            Ok(result) => result,
            Err(_) => Err(BarrierError::Dropped(self.barrier_id)),
        }
    }
}

impl IntoFuture for BarrierWait {
    type Output = BarrierResult;
    type IntoFuture = BoxFuture<'static, BarrierResult>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

/// Live state of an active barrier
pub(crate) struct BarrierState {
    pub(crate) id: String,
    pub(crate) expected: Vec<String>,
    pub(crate) ready: Vec<String>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) timeout: Duration,
    /// Distinguishes this barrier from earlier ones that used the same id
    pub(crate) generation: u64,
    completion: Option<oneshot::Sender<BarrierResult>>,
    timer: Option<JoinHandle<()>>,
}

impl BarrierState {
    pub(crate) fn new(
        id: String,
        expected: Vec<String>,
        timeout: Duration,
    ) -> (Self, BarrierWait) {
        let (tx, rx) = oneshot::channel();
        let wait = BarrierWait::new(id.clone(), rx);
        let state = Self {
            id,
            expected,
            ready: Vec::new(),
            created_at: Utc::now(),
            timeout,
            generation: 0,
            completion: Some(tx),
            timer: None,
        };
        (state, wait)
    }

    /// Attach the timeout task spawned for `generation`
    pub(crate) fn arm(&mut self, generation: u64, timer: JoinHandle<()>) {
        self.generation = generation;
        self.timer = Some(timer);
    }

    /// Record an arrival. Repeated signals from one agent count once.
    pub(crate) fn signal(&mut self, agent_id: &str) -> BarrierProgress {
        if !self.ready.iter().any(|a| a == agent_id) {
            self.ready.push(agent_id.to_string());
        }
        self.progress()
    }

    pub(crate) fn progress(&self) -> BarrierProgress {
        BarrierProgress {
            barrier_id: self.id.clone(),
            ready: self.ready.len(),
            total: self.expected.len(),
        }
    }

    /// Resolve the waiter and stop the timer. Consumes the state, so a
    /// barrier can only finish once.
    pub(crate) fn finish(mut self, reason: CompletionReason) -> BarrierEvent {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }

        let success = reason.is_success();
        let result = if success {
            Ok(BarrierOutcome {
                barrier_id: self.id.clone(),
                success,
                ready_agents: self.ready.clone(),
                completed_at: Utc::now(),
                reason,
            })
        } else {
            Err(BarrierError::Failed {
                barrier_id: self.id.clone(),
                reason,
                ready_agents: self.ready.clone(),
            })
        };

        if let Some(tx) = self.completion.take() {
            // The waiter may have been dropped; completion still counts
            let _ = tx.send(result);
        }

        BarrierEvent::Completed {
            barrier_id: self.id,
            success,
            reason: reason.to_string(),
        }
    }
}
