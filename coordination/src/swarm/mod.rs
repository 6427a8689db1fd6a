//! Swarm coordination primitives
//!
//! - [`membership`]: worktree → agent registry
//! - [`barrier`]: wait until a set of agents has signalled
//! - [`election`]: majority-vote leader selection
//! - [`partition`]: split a task into per-agent slices
//! - [`coordinator`]: the hub tying these to the bus and persistence
//! - [`context`]: owner of a process-wide coordinator

pub mod barrier;
pub mod context;
pub mod coordinator;
pub mod election;
pub mod membership;
mod outcome;
pub mod partition;

pub use barrier::{
    BarrierError, BarrierOutcome, BarrierProgress, BarrierResult, BarrierWait, SignalRejection,
};
pub use context::{create_swarm_coordinator, SwarmContext};
pub use coordinator::{CleanupReport, SwarmCoordinator, SwarmStatus};
pub use election::{
    ElectionError, ElectionOutcome, ElectionResult, ElectionWait, Vote, VoteRejection,
};
pub use membership::{normalize_path, WorktreeRegistry};
pub use outcome::CompletionReason;

use crate::events::MessageType;

/// The closed set of message types the bus accepts
pub const MESSAGE_TYPES: [MessageType; 7] = MessageType::ALL;
