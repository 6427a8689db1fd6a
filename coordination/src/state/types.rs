//! Durable swarm state
//!
//! Only worktree membership and task partitions survive a restart. Messages,
//! barriers, elections and subscribers are transient coordination state.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SwarmError;

/// Opaque task fields supplied by the caller
pub type TaskFields = Map<String, Value>;

/// Snapshot written to `swarm-state.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSnapshot {
    pub worktree_agents: Vec<WorktreeEntry>,
    pub task_partitions: Vec<PartitionSet>,
}

/// Agents registered under one worktree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorktreeEntry {
    pub worktree: String,
    pub agents: Vec<String>,
}

/// How a task is split across agents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartitionStrategy {
    #[serde(rename = "round-robin")]
    RoundRobin,
    /// Currently produces the same layout as round-robin; no content hashing
    #[serde(rename = "hash")]
    Hash,
}

impl PartitionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionStrategy::RoundRobin => "round-robin",
            PartitionStrategy::Hash => "hash",
        }
    }
}

impl Default for PartitionStrategy {
    fn default() -> Self {
        PartitionStrategy::RoundRobin
    }
}

impl fmt::Display for PartitionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PartitionStrategy {
    type Err = SwarmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round-robin" => Ok(PartitionStrategy::RoundRobin),
            "hash" => Ok(PartitionStrategy::Hash),
            other => Err(SwarmError::UnknownStrategy(other.to_string())),
        }
    }
}

/// The caller's task plus the slice metadata for one partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionedTask {
    #[serde(flatten)]
    pub fields: TaskFields,
    pub partition_index: usize,
    pub total_partitions: usize,
}

impl PartitionedTask {
    /// Build the slice for `index`. Metadata keys in `fields` are replaced.
    pub fn new(fields: &TaskFields, index: usize, total: usize) -> Self {
        let mut fields = fields.clone();
        fields.remove("partitionIndex");
        fields.remove("totalPartitions");
        Self {
            fields,
            partition_index: index,
            total_partitions: total,
        }
    }
}

/// One agent's share of a partitioned task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionDescriptor {
    /// `<partition set id>-<index>`
    pub partition_id: String,
    pub agent_index: usize,
    pub task: PartitionedTask,
}

/// All partitions produced by one `partition_task` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionSet {
    pub partition_id: String,
    pub partitions: Vec<PartitionDescriptor>,
    pub created_at: DateTime<Utc>,
    pub strategy: PartitionStrategy,
    pub agent_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_names() {
        assert_eq!(
            "round-robin".parse::<PartitionStrategy>().unwrap(),
            PartitionStrategy::RoundRobin
        );
        assert_eq!("hash".parse::<PartitionStrategy>().unwrap(), PartitionStrategy::Hash);
        assert!(matches!(
            "random".parse::<PartitionStrategy>(),
            Err(SwarmError::UnknownStrategy(s)) if s == "random"
        ));
        assert_eq!(
            serde_json::to_value(PartitionStrategy::RoundRobin).unwrap(),
            "round-robin"
        );
    }

    #[test]
    fn test_partitioned_task_flattens_fields() {
        let mut fields = TaskFields::new();
        fields.insert("prompt".to_string(), Value::from("refactor"));
        fields.insert("partitionIndex".to_string(), Value::from(99));

        let task = PartitionedTask::new(&fields, 1, 3);
        let json = serde_json::to_value(&task).unwrap();

        assert_eq!(json["prompt"], "refactor");
        assert_eq!(json["partitionIndex"], 1);
        assert_eq!(json["totalPartitions"], 3);

        let back: PartitionedTask = serde_json::from_value(json).unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn test_snapshot_uses_camel_case() {
        let snapshot = PersistedSnapshot {
            worktree_agents: vec![WorktreeEntry {
                worktree: "/w".to_string(),
                agents: vec!["a".to_string()],
            }],
            task_partitions: Vec::new(),
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert!(json.get("worktreeAgents").is_some());
        assert!(json.get("taskPartitions").is_some());
    }
}
