//! Message types for swarm coordination
//!
//! The message-type set is closed: every [`SwarmMessage`] carries exactly one
//! of the seven [`MessageType`]s, and its payload shape is fixed by that type.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SwarmError;

/// Unique identifier for messages
pub type MessageId = String;

/// The closed set of message channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Spawn,
    BarrierSync,
    LeaderElection,
    TaskPartition,
    StatusUpdate,
    Result,
    Error,
}

impl MessageType {
    /// Every valid message type, in declaration order
    pub const ALL: [MessageType; 7] = [
        MessageType::Spawn,
        MessageType::BarrierSync,
        MessageType::LeaderElection,
        MessageType::TaskPartition,
        MessageType::StatusUpdate,
        MessageType::Result,
        MessageType::Error,
    ];

    /// Wire name of this message type
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Spawn => "spawn",
            MessageType::BarrierSync => "barrier_sync",
            MessageType::LeaderElection => "leader_election",
            MessageType::TaskPartition => "task_partition",
            MessageType::StatusUpdate => "status_update",
            MessageType::Result => "result",
            MessageType::Error => "error",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = SwarmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| SwarmError::InvalidMessageType(s.to_string()))
    }
}

/// Lifecycle events published on the `barrier_sync` channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BarrierEvent {
    Created {
        barrier_id: String,
        expected_count: usize,
    },
    Completed {
        barrier_id: String,
        success: bool,
        reason: String,
    },
}

/// Lifecycle events published on the `leader_election` channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ElectionEvent {
    Started {
        election_id: String,
        candidates: Vec<String>,
    },
    Completed {
        election_id: String,
        winner: Option<String>,
        reason: String,
    },
}

/// Payload of a message, one variant per [`MessageType`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum MessagePayload {
    /// An agent joined a worktree
    Spawn {
        agent_id: String,
        worktree: PathBuf,
        timestamp: DateTime<Utc>,
    },

    BarrierSync(BarrierEvent),

    LeaderElection(ElectionEvent),

    /// A task was split across agents
    TaskPartition {
        partition_id: String,
        partition_count: usize,
        strategy: String,
    },

    /// Free-form progress report from an agent
    StatusUpdate {
        agent_id: String,
        status: String,
        #[serde(default)]
        detail: serde_json::Value,
    },

    /// An agent produced output for a task
    Result {
        agent_id: String,
        #[serde(default)]
        task_id: Option<String>,
        #[serde(default)]
        output: serde_json::Value,
    },

    /// An agent reported a failure
    Error {
        #[serde(default)]
        agent_id: Option<String>,
        message: String,
    },
}

impl MessagePayload {
    /// The channel this payload belongs to
    pub fn message_type(&self) -> MessageType {
        match self {
            MessagePayload::Spawn { .. } => MessageType::Spawn,
            MessagePayload::BarrierSync(_) => MessageType::BarrierSync,
            MessagePayload::LeaderElection(_) => MessageType::LeaderElection,
            MessagePayload::TaskPartition { .. } => MessageType::TaskPartition,
            MessagePayload::StatusUpdate { .. } => MessageType::StatusUpdate,
            MessagePayload::Result { .. } => MessageType::Result,
            MessagePayload::Error { .. } => MessageType::Error,
        }
    }

    /// Decode an untyped payload for a named message type.
    ///
    /// Fails with [`SwarmError::InvalidMessageType`] for names outside the
    /// closed set and [`SwarmError::InvalidPayload`] when the JSON does not
    /// match that type's payload shape.
    pub fn from_json(message_type: &str, payload: serde_json::Value) -> Result<Self, SwarmError> {
        let message_type: MessageType = message_type.parse()?;
        let tagged = serde_json::json!({
            "type": message_type.as_str(),
            "payload": payload,
        });
        serde_json::from_value(tagged).map_err(|source| SwarmError::InvalidPayload {
            message_type,
            source,
        })
    }
}

/// An immutable published message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmMessage {
    pub id: MessageId,
    #[serde(flatten)]
    pub payload: MessagePayload,
    pub timestamp: DateTime<Utc>,
}

impl SwarmMessage {
    /// Stamp a payload with a fresh id and the current time
    pub fn new(payload: MessagePayload) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Get the message type
    pub fn message_type(&self) -> MessageType {
        self.payload.message_type()
    }
}
