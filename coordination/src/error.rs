//! Contract errors for swarm coordination
//!
//! These are raised at the call that misuses the API. Ordinary race outcomes
//! of multi-agent coordination (late signals, unknown ids, bad candidates)
//! are not errors of this kind; see [`crate::swarm::SignalRejection`] and
//! [`crate::swarm::VoteRejection`].

use crate::events::MessageType;
use crate::state::StoreError;

/// Result type alias for coordinator operations
pub type SwarmResult<T> = Result<T, SwarmError>;

/// Error type for coordinator operations
#[derive(Debug, thiserror::Error)]
pub enum SwarmError {
    #[error("Invalid message type: {0}")]
    InvalidMessageType(String),

    #[error("Invalid payload for message type {message_type}: {source}")]
    InvalidPayload {
        message_type: MessageType,
        #[source]
        source: serde_json::Error,
    },

    #[error("Barrier {0} already exists")]
    BarrierExists(String),

    #[error("Election {0} already exists")]
    ElectionExists(String),

    #[error("Unknown partition strategy: {0}")]
    UnknownStrategy(String),

    #[error("Agent count must be at least 1 (partition {0})")]
    InvalidAgentCount(String),

    #[error("Barriers and elections need a running Tokio runtime")]
    NoRuntime,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
