//! Task partitioning
//!
//! Splits one task into `agent_count` slices. Both strategies currently lay
//! out partitions identically (slice `i` goes to agent `i`); `hash` does not
//! look at task content.

use chrono::Utc;

use crate::state::{PartitionDescriptor, PartitionSet, PartitionStrategy, PartitionedTask, TaskFields};

/// Build the partition set for a task
pub fn partition(
    partition_id: &str,
    task: &TaskFields,
    agent_count: usize,
    strategy: PartitionStrategy,
) -> PartitionSet {
    let partitions = match strategy {
        PartitionStrategy::RoundRobin | PartitionStrategy::Hash => {
            round_robin(partition_id, task, agent_count)
        }
    };

    PartitionSet {
        partition_id: partition_id.to_string(),
        partitions,
        created_at: Utc::now(),
        strategy,
        agent_count,
    }
}

fn round_robin(partition_id: &str, task: &TaskFields, agent_count: usize) -> Vec<PartitionDescriptor> {
    (0..agent_count)
        .map(|i| PartitionDescriptor {
            partition_id: format!("{}-{}", partition_id, i),
            agent_index: i,
            task: PartitionedTask::new(task, i, agent_count),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn task() -> TaskFields {
        let mut fields = TaskFields::new();
        fields.insert("goal".to_string(), Value::from("migrate tests"));
        fields
    }

    #[test]
    fn test_round_robin_layout() {
        let set = partition("migrate", &task(), 3, PartitionStrategy::RoundRobin);

        assert_eq!(set.agent_count, 3);
        assert_eq!(set.partitions.len(), 3);
        for (i, p) in set.partitions.iter().enumerate() {
            assert_eq!(p.agent_index, i);
            assert_eq!(p.partition_id, format!("migrate-{}", i));
            assert_eq!(p.task.partition_index, i);
            assert_eq!(p.task.total_partitions, 3);
            assert_eq!(p.task.fields["goal"], "migrate tests");
        }
    }

    #[test]
    fn test_hash_matches_round_robin() {
        let rr = partition("p", &task(), 4, PartitionStrategy::RoundRobin);
        let hash = partition("p", &task(), 4, PartitionStrategy::Hash);
        assert_eq!(rr.partitions, hash.partitions);
        assert_eq!(hash.strategy, PartitionStrategy::Hash);
    }
}
