//! Swarm Coordination Library
//!
//! In-process coordination for agents working in parallel git worktrees of
//! one project:
//! - Typed publish/subscribe over a closed set of message types
//! - Worktree → agent membership
//! - Barriers that wait for a set of agents, with timeouts
//! - Majority-vote leader election, with timeouts
//! - Task partitioning into per-agent slices
//! - JSON persistence of membership and partitions under
//!   `<project>/.openchamber/swarm-state.json`
//!
//! # Usage
//!
//! ```no_run
//! use coordination::{SwarmConfig, SwarmCoordinator};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let swarm = SwarmCoordinator::open("/path/to/project", SwarmConfig::from_env()).await;
//! swarm.register_worktree_agent("agent-1", "/path/to/project/.worktrees/wt-1");
//!
//! let barrier = swarm.create_barrier("merge", vec!["agent-1".to_string()], None)?;
//! swarm.signal_barrier("agent-1", "merge")?;
//! let outcome = barrier.await?;
//! assert!(outcome.success);
//!
//! swarm.flush().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! | Variable | Default |
//! |----------|---------|
//! | `SWARM_STATE_DIR` | `.openchamber` |
//! | `SWARM_STATE_FILE` | `swarm-state.json` |
//! | `SWARM_BARRIER_TIMEOUT_MS` | `300000` |
//! | `SWARM_ELECTION_TIMEOUT_MS` | `30000` |
//! | `SWARM_TOMBSTONE_CAPACITY` | `256` |

#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod error;
pub mod events;
pub mod state;
pub mod swarm;

pub use config::SwarmConfig;
pub use error::{SwarmError, SwarmResult};
pub use events::{MessageBus, MessagePayload, MessageType, Subscription, SwarmMessage};
pub use state::{PartitionDescriptor, PartitionSet, PartitionStrategy, TaskFields};
pub use swarm::{
    create_swarm_coordinator, BarrierError, BarrierOutcome, BarrierProgress, CleanupReport,
    CompletionReason, ElectionError, ElectionOutcome, SignalRejection, SwarmContext,
    SwarmCoordinator, SwarmStatus, Vote, VoteRejection, MESSAGE_TYPES,
};
