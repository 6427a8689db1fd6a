//! Swarm coordinator - in-process coordination hub for cooperating agents
//!
//! Owns worktree membership, the message bus, active barriers and elections,
//! task partitions, and the persisted snapshot of membership + partitions.
//!
//! All methods are synchronous apart from initialization and `flush`. State
//! is mutated under a short lock; waiters are resolved and messages published
//! only after it is released, so subscribers may call back into the
//! coordinator.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::barrier::{BarrierProgress, BarrierState, BarrierWait, SignalRejection};
use super::election::{ElectionState, ElectionWait, Vote, VoteRejection};
use super::membership::{normalize_path, WorktreeRegistry};
use super::outcome::{CompletionReason, Tombstones};
use super::partition;
use crate::config::SwarmConfig;
use crate::error::{SwarmError, SwarmResult};
use crate::events::{
    BarrierEvent, ElectionEvent, MessageBus, MessagePayload, MessageType, Subscription,
    SwarmMessage,
};
use crate::state::{
    JsonFileBackend, PartitionDescriptor, PartitionSet, PartitionStrategy, PersistQueue,
    PersistedSnapshot, SnapshotBackend, SnapshotSource, SnapshotStore, TaskFields,
};

/// Point-in-time view of coordinator activity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwarmStatus {
    pub active_barriers: Vec<String>,
    pub active_elections: Vec<String>,
    pub active_partitions: Vec<String>,
    pub worktree_count: usize,
    /// Sum over worktrees, so an agent in two worktrees counts twice
    pub total_agents: usize,
}

/// Acknowledgement returned by [`SwarmCoordinator::cleanup`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub success: bool,
    pub barriers_failed: usize,
    pub elections_failed: usize,
}

#[derive(Default)]
struct SwarmState {
    worktrees: WorktreeRegistry,
    partitions: BTreeMap<String, PartitionSet>,
    barriers: HashMap<String, BarrierState>,
    elections: HashMap<String, ElectionState>,
    finished_barriers: Tombstones,
    finished_elections: Tombstones,
    generation: u64,
}

impl SwarmState {
    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn take_barrier(&mut self, barrier_id: &str) -> Option<BarrierState> {
        let barrier = self.barriers.remove(barrier_id)?;
        self.finished_barriers.record(barrier_id);
        Some(barrier)
    }

    fn take_election(&mut self, election_id: &str) -> Option<ElectionState> {
        let election = self.elections.remove(election_id)?;
        self.finished_elections.record(election_id);
        Some(election)
    }

    /// Take the barrier only if it is still the instance armed with `generation`
    fn take_barrier_generation(
        &mut self,
        barrier_id: &str,
        generation: u64,
    ) -> Option<BarrierState> {
        match self.barriers.get(barrier_id) {
            Some(barrier) if barrier.generation == generation => self.take_barrier(barrier_id),
            _ => None,
        }
    }

    fn take_election_generation(
        &mut self,
        election_id: &str,
        generation: u64,
    ) -> Option<ElectionState> {
        match self.elections.get(election_id) {
            Some(election) if election.generation == generation => {
                self.take_election(election_id)
            }
            _ => None,
        }
    }
}

struct CoordinatorInner {
    directory: PathBuf,
    config: SwarmConfig,
    bus: MessageBus,
    state: Mutex<SwarmState>,
    persistence: Arc<PersistQueue>,
}

impl SnapshotSource for CoordinatorInner {
    fn snapshot(&self) -> PersistedSnapshot {
        let state = self.state.lock();
        PersistedSnapshot {
            worktree_agents: state.worktrees.entries(),
            task_partitions: state.partitions.values().cloned().collect(),
        }
    }
}

impl CoordinatorInner {
    fn finish_barrier(&self, barrier: BarrierState, reason: CompletionReason) {
        let barrier_id = barrier.id.clone();
        let ready = barrier.ready.len();
        let expected = barrier.expected.len();
        let elapsed_ms = (Utc::now() - barrier.created_at).num_milliseconds();
        let barrier_timeout_ms = barrier.timeout.as_millis() as u64;

        let event = barrier.finish(reason);

        if reason.is_success() {
            info!(barrier_id = %barrier_id, ready, expected, elapsed_ms, "Barrier completed");
        } else {
            warn!(
                barrier_id = %barrier_id,
                %reason,
                ready,
                expected,
                timeout_ms = barrier_timeout_ms,
                "Barrier failed"
            );
        }
        self.bus.publish(MessagePayload::BarrierSync(event));
    }

    fn complete_barrier(&self, barrier_id: &str, reason: CompletionReason) -> bool {
        let barrier = self.state.lock().take_barrier(barrier_id);
        match barrier {
            Some(barrier) => {
                self.finish_barrier(barrier, reason);
                true
            }
            None => false,
        }
    }

    /// Timeout path. A timer that outlives its barrier must not fail a newer
    /// barrier that reuses the id.
    fn expire_barrier(&self, barrier_id: &str, generation: u64) -> bool {
        let barrier = self
            .state
            .lock()
            .take_barrier_generation(barrier_id, generation);
        match barrier {
            Some(barrier) => {
                self.finish_barrier(barrier, CompletionReason::Timeout);
                true
            }
            None => {
                debug!(barrier_id, generation, "Stale barrier timer ignored");
                false
            }
        }
    }

    fn finish_election(
        &self,
        election: ElectionState,
        winner: Option<String>,
        reason: CompletionReason,
    ) {
        let election_id = election.id.clone();
        let votes = election.votes.len();
        let elapsed_ms = (Utc::now() - election.created_at).num_milliseconds();
        let election_timeout_ms = election.timeout.as_millis() as u64;

        let event = election.finish(winner.clone(), reason);

        match &winner {
            Some(winner) => {
                info!(election_id = %election_id, winner = %winner, votes, elapsed_ms, "Leader elected")
            }
            None => {
                warn!(
                    election_id = %election_id,
                    %reason,
                    votes,
                    elapsed_ms,
                    timeout_ms = election_timeout_ms,
                    "Election failed"
                )
            }
        }
        self.bus.publish(MessagePayload::LeaderElection(event));
    }

    fn expire_election(&self, election_id: &str, generation: u64) -> bool {
        let election = self
            .state
            .lock()
            .take_election_generation(election_id, generation);
        match election {
            Some(election) => {
                self.finish_election(election, None, CompletionReason::Timeout);
                true
            }
            None => {
                debug!(election_id, generation, "Stale election timer ignored");
                false
            }
        }
    }
}

/// Process-local coordination hub scoped to one project directory.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct SwarmCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl SwarmCoordinator {
    /// Bind to a project directory and load `<dir>/.openchamber/swarm-state.json`.
    ///
    /// Never fails on a missing, unreadable or corrupt state file; the
    /// coordinator then starts empty.
    pub async fn open(directory: impl AsRef<Path>, config: SwarmConfig) -> Self {
        let directory = absolute_directory(directory.as_ref());
        let backend = Arc::new(JsonFileBackend::new(config.state_path(&directory)));
        Self::with_backend(directory, config, backend).await
    }

    /// Like [`open`](Self::open) with a caller-supplied persistence backend
    pub async fn with_backend(
        directory: impl AsRef<Path>,
        config: SwarmConfig,
        backend: Arc<dyn SnapshotBackend>,
    ) -> Self {
        let directory = absolute_directory(directory.as_ref());
        let store = SnapshotStore::new(backend);

        let mut state = SwarmState {
            finished_barriers: Tombstones::new(config.tombstone_capacity),
            finished_elections: Tombstones::new(config.tombstone_capacity),
            ..SwarmState::default()
        };

        match store.load().await {
            Ok(Some(snapshot)) => {
                state.worktrees = WorktreeRegistry::from_entries(&directory, &snapshot.worktree_agents);
                state.partitions = snapshot
                    .task_partitions
                    .into_iter()
                    .map(|set| (set.partition_id.clone(), set))
                    .collect();
            }
            Ok(None) => debug!(store = %store.describe(), "No saved swarm state, starting empty"),
            Err(e) => warn!(
                store = %store.describe(),
                "Failed to load swarm state, starting empty: {}",
                e
            ),
        }

        info!(
            directory = %directory.display(),
            worktrees = state.worktrees.len(),
            partitions = state.partitions.len(),
            "Swarm coordinator initialized"
        );

        let bus = MessageBus::new(config.observer_capacity);
        Self {
            inner: Arc::new(CoordinatorInner {
                directory,
                config,
                bus,
                state: Mutex::new(state),
                persistence: Arc::new(PersistQueue::new(store)),
            }),
        }
    }

    /// Project directory this coordinator is bound to
    pub fn directory(&self) -> &Path {
        &self.inner.directory
    }

    pub fn config(&self) -> &SwarmConfig {
        &self.inner.config
    }

    /// Whether `directory`, resolved the same way [`open`](Self::open)
    /// resolves it, is the bound project directory
    pub fn is_bound_to(&self, directory: impl AsRef<Path>) -> bool {
        absolute_directory(directory.as_ref()) == self.inner.directory
    }

    fn resolve(&self, worktree: &Path) -> PathBuf {
        normalize_path(&self.inner.directory, worktree)
    }

    fn mark_dirty(&self) {
        self.inner.persistence.mark_dirty(Arc::clone(&self.inner));
    }

    fn runtime() -> SwarmResult<Handle> {
        Handle::try_current().map_err(|_| SwarmError::NoRuntime)
    }

    fn spawn_timer<F>(&self, runtime: &Handle, timeout: Duration, on_fire: F) -> JoinHandle<()>
    where
        F: FnOnce(&CoordinatorInner) + Send + 'static,
    {
        let inner: Weak<CoordinatorInner> = Arc::downgrade(&self.inner);
        runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = inner.upgrade() {
                on_fire(&inner);
            }
        })
    }

    // =========================================================================
    // Worktree membership
    // =========================================================================

    /// Register an agent under a worktree and announce it on `spawn`.
    ///
    /// Returns the normalized worktree path used as the key.
    pub fn register_worktree_agent(&self, agent_id: &str, worktree: impl AsRef<Path>) -> PathBuf {
        let worktree = self.resolve(worktree.as_ref());
        let added = self
            .inner
            .state
            .lock()
            .worktrees
            .insert(agent_id, worktree.clone());

        if added {
            info!(agent_id, worktree = %worktree.display(), "Agent registered");
        } else {
            debug!(agent_id, worktree = %worktree.display(), "Agent already registered");
        }

        self.mark_dirty();
        self.inner.bus.publish(MessagePayload::Spawn {
            agent_id: agent_id.to_string(),
            worktree: worktree.clone(),
            timestamp: Utc::now(),
        });
        worktree
    }

    /// Remove an agent from a worktree. Unknown agents or worktrees are a no-op.
    pub fn unregister_worktree_agent(&self, agent_id: &str, worktree: impl AsRef<Path>) -> bool {
        let worktree = self.resolve(worktree.as_ref());
        let removed = self.inner.state.lock().worktrees.remove(agent_id, &worktree);

        if removed {
            info!(agent_id, worktree = %worktree.display(), "Agent unregistered");
        }
        self.mark_dirty();
        removed
    }

    /// Agents registered under a worktree
    pub fn worktree_agents(&self, worktree: impl AsRef<Path>) -> Vec<String> {
        let worktree = self.resolve(worktree.as_ref());
        self.inner.state.lock().worktrees.agents(&worktree)
    }

    /// All worktrees with at least one agent
    pub fn all_worktrees(&self) -> Vec<PathBuf> {
        self.inner.state.lock().worktrees.worktrees()
    }

    /// Worktrees an agent is registered under
    pub fn agent_worktrees(&self, agent_id: &str) -> Vec<PathBuf> {
        self.inner.state.lock().worktrees.worktrees_for(agent_id)
    }

    // =========================================================================
    // Messaging
    // =========================================================================

    /// Register a handler for a message type
    pub fn subscribe<F>(&self, message_type: MessageType, handler: F) -> Subscription
    where
        F: Fn(&SwarmMessage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(message_type, handler)
    }

    /// Subscribe by type name, rejecting names outside the closed set
    pub fn subscribe_json<F>(&self, message_type: &str, handler: F) -> SwarmResult<Subscription>
    where
        F: Fn(&SwarmMessage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.bus.subscribe_json(message_type, handler)
    }

    /// Publish a typed payload
    pub fn publish(&self, payload: MessagePayload) -> SwarmMessage {
        self.inner.bus.publish(payload)
    }

    /// Publish from an untyped boundary, validating the type name and payload
    pub fn publish_json(
        &self,
        message_type: &str,
        payload: serde_json::Value,
    ) -> SwarmResult<SwarmMessage> {
        self.inner.bus.publish_json(message_type, payload)
    }

    /// Receive every published message ("message received" stream)
    pub fn observe(&self) -> broadcast::Receiver<SwarmMessage> {
        self.inner.bus.observe()
    }

    /// Number of handler registrations across all types
    pub fn subscriber_count(&self) -> usize {
        self.inner.bus.total_subscribers()
    }

    // =========================================================================
    // Barriers
    // =========================================================================

    /// Create a barrier for a fixed set of agents.
    ///
    /// Must be called from within a Tokio runtime (the timeout runs as a
    /// task). An empty `expected_agents` list completes immediately.
    pub fn create_barrier(
        &self,
        barrier_id: &str,
        expected_agents: Vec<String>,
        timeout: Option<Duration>,
    ) -> SwarmResult<BarrierWait> {
        let runtime = Self::runtime()?;
        let timeout = timeout.unwrap_or(self.inner.config.default_barrier_timeout);
        let expected_count = expected_agents.len();

        let wait = {
            let mut state = self.inner.state.lock();
            if state.barriers.contains_key(barrier_id) {
                return Err(SwarmError::BarrierExists(barrier_id.to_string()));
            }
            state.finished_barriers.forget(barrier_id);

            let generation = state.next_generation();
            let (mut barrier, wait) =
                BarrierState::new(barrier_id.to_string(), expected_agents, timeout);
            let id = barrier_id.to_string();
            let timer = self.spawn_timer(&runtime, timeout, move |inner| {
                inner.expire_barrier(&id, generation);
            });
            barrier.arm(generation, timer);
            state.barriers.insert(barrier_id.to_string(), barrier);
            wait
        };

        info!(
            barrier_id,
            expected = expected_count,
            timeout_ms = timeout.as_millis() as u64,
            "Barrier created"
        );
        self.inner
            .bus
            .publish(MessagePayload::BarrierSync(BarrierEvent::Created {
                barrier_id: barrier_id.to_string(),
                expected_count,
            }));

        if expected_count == 0 {
            self.inner
                .complete_barrier(barrier_id, CompletionReason::AllReady);
        }

        Ok(wait)
    }

    /// Signal that `agent_id` reached the barrier.
    ///
    /// Completes the barrier from within this call once the ready count
    /// reaches the expected count.
    pub fn signal_barrier(
        &self,
        agent_id: &str,
        barrier_id: &str,
    ) -> Result<BarrierProgress, SignalRejection> {
        let (progress, finished) = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            let progress = match state.barriers.get_mut(barrier_id) {
                Some(barrier) => barrier.signal(agent_id),
                None if state.finished_barriers.contains(barrier_id) => {
                    return Err(SignalRejection::AlreadyCompleted);
                }
                None => return Err(SignalRejection::NotFound),
            };
            let finished = if progress.is_complete() {
                state.take_barrier(barrier_id)
            } else {
                None
            };
            (progress, finished)
        };

        debug!(
            barrier_id,
            agent_id,
            ready = progress.ready,
            total = progress.total,
            "Barrier signalled"
        );

        if let Some(barrier) = finished {
            self.inner.finish_barrier(barrier, CompletionReason::AllReady);
        }
        Ok(progress)
    }

    /// Arrival counts for an active barrier
    pub fn barrier_progress(&self, barrier_id: &str) -> Option<BarrierProgress> {
        self.inner
            .state
            .lock()
            .barriers
            .get(barrier_id)
            .map(BarrierState::progress)
    }

    // =========================================================================
    // Leader election
    // =========================================================================

    /// Start an election among `candidates`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn conduct_election(
        &self,
        election_id: &str,
        candidates: Vec<String>,
        timeout: Option<Duration>,
    ) -> SwarmResult<ElectionWait> {
        let runtime = Self::runtime()?;
        let timeout = timeout.unwrap_or(self.inner.config.default_election_timeout);

        let (wait, candidates) = {
            let mut state = self.inner.state.lock();
            if state.elections.contains_key(election_id) {
                return Err(SwarmError::ElectionExists(election_id.to_string()));
            }
            state.finished_elections.forget(election_id);

            let generation = state.next_generation();
            let (mut election, wait) =
                ElectionState::new(election_id.to_string(), candidates, timeout);
            let candidates = election.candidates.clone();
            let id = election_id.to_string();
            let timer = self.spawn_timer(&runtime, timeout, move |inner| {
                inner.expire_election(&id, generation);
            });
            election.arm(generation, timer);
            state.elections.insert(election_id.to_string(), election);
            (wait, candidates)
        };

        info!(
            election_id,
            candidates = ?candidates,
            timeout_ms = timeout.as_millis() as u64,
            "Election started"
        );
        self.inner
            .bus
            .publish(MessagePayload::LeaderElection(ElectionEvent::Started {
                election_id: election_id.to_string(),
                candidates,
            }));

        Ok(wait)
    }

    /// Record `voter_id`'s vote, completing the election on a strict majority
    pub fn cast_vote(
        &self,
        election_id: &str,
        voter_id: &str,
        candidate_id: &str,
    ) -> Result<Vec<Vote>, VoteRejection> {
        let (votes, finished) = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            let (votes, leader) = match state.elections.get_mut(election_id) {
                Some(election) => {
                    let votes = election.cast(voter_id, candidate_id)?;
                    (votes, election.leader())
                }
                None if state.finished_elections.contains(election_id) => {
                    return Err(VoteRejection::AlreadyCompleted);
                }
                None => return Err(VoteRejection::NotFound),
            };
            let finished = match leader {
                Some(winner) => state
                    .take_election(election_id)
                    .map(|election| (election, winner)),
                None => None,
            };
            (votes, finished)
        };

        debug!(election_id, voter_id, candidate_id, votes = votes.len(), "Vote cast");

        if let Some((election, winner)) = finished {
            self.inner
                .finish_election(election, Some(winner), CompletionReason::Majority);
        }
        Ok(votes)
    }

    // =========================================================================
    // Task partitioning
    // =========================================================================

    /// Split a task across `agent_count` agents using a named strategy
    /// (`round-robin` or `hash`)
    pub fn partition_task(
        &self,
        partition_id: &str,
        task: &TaskFields,
        agent_count: usize,
        strategy: &str,
    ) -> SwarmResult<Vec<PartitionDescriptor>> {
        let strategy: PartitionStrategy = strategy.parse()?;
        self.partition_task_with(partition_id, task, agent_count, strategy)
    }

    /// Typed variant of [`partition_task`](Self::partition_task)
    pub fn partition_task_with(
        &self,
        partition_id: &str,
        task: &TaskFields,
        agent_count: usize,
        strategy: PartitionStrategy,
    ) -> SwarmResult<Vec<PartitionDescriptor>> {
        if agent_count == 0 {
            return Err(SwarmError::InvalidAgentCount(partition_id.to_string()));
        }

        let set = partition::partition(partition_id, task, agent_count, strategy);
        let partitions = set.partitions.clone();

        let replaced = self
            .inner
            .state
            .lock()
            .partitions
            .insert(partition_id.to_string(), set)
            .is_some();

        info!(
            partition_id,
            agent_count,
            strategy = %strategy,
            replaced,
            "Task partitioned"
        );

        self.mark_dirty();
        self.inner.bus.publish(MessagePayload::TaskPartition {
            partition_id: partition_id.to_string(),
            partition_count: partitions.len(),
            strategy: strategy.to_string(),
        });
        Ok(partitions)
    }

    /// Stored partition set, if any
    pub fn partition(&self, partition_id: &str) -> Option<PartitionSet> {
        self.inner.state.lock().partitions.get(partition_id).cloned()
    }

    // =========================================================================
    // Status & lifecycle
    // =========================================================================

    /// Snapshot of current activity
    pub fn status(&self) -> SwarmStatus {
        let state = self.inner.state.lock();

        let mut active_barriers: Vec<String> = state.barriers.keys().cloned().collect();
        active_barriers.sort();
        let mut active_elections: Vec<String> = state.elections.keys().cloned().collect();
        active_elections.sort();

        SwarmStatus {
            active_barriers,
            active_elections,
            active_partitions: state.partitions.keys().cloned().collect(),
            worktree_count: state.worktrees.len(),
            total_agents: state.worktrees.total_agents(),
        }
    }

    /// Persist membership and partitions now, after any in-flight write
    pub async fn flush(&self) -> SwarmResult<()> {
        self.inner
            .persistence
            .flush(self.inner.as_ref())
            .await
            .map_err(SwarmError::from)
    }

    /// Number of snapshot writes completed so far
    pub fn persisted_writes(&self) -> u64 {
        self.inner.persistence.writes_completed()
    }

    /// Fail every active barrier and election with `shutdown`, then drop
    /// subscribers and partitions.
    ///
    /// Does not persist; call [`flush`](Self::flush) first for a final
    /// snapshot.
    pub fn cleanup(&self) -> CleanupReport {
        let (barriers, elections) = {
            let mut state = self.inner.state.lock();
            let barriers: Vec<BarrierState> = state.barriers.drain().map(|(_, b)| b).collect();
            let elections: Vec<ElectionState> =
                state.elections.drain().map(|(_, e)| e).collect();
            state.partitions.clear();
            state.finished_barriers.clear();
            state.finished_elections.clear();
            (barriers, elections)
        };

        let report = CleanupReport {
            success: true,
            barriers_failed: barriers.len(),
            elections_failed: elections.len(),
        };

        for barrier in barriers {
            self.inner.finish_barrier(barrier, CompletionReason::Shutdown);
        }
        for election in elections {
            self.inner
                .finish_election(election, None, CompletionReason::Shutdown);
        }
        self.inner.bus.clear();

        info!(
            barriers = report.barriers_failed,
            elections = report.elections_failed,
            "Swarm coordinator cleaned up"
        );
        report
    }
}

impl std::fmt::Debug for SwarmCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwarmCoordinator")
            .field("directory", &self.inner.directory)
            .finish_non_exhaustive()
    }
}

fn absolute_directory(directory: &Path) -> PathBuf {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
    normalize_path(&cwd, directory)
}
