//! End-to-End Integration Tests for the Swarm Coordinator
//!
//! Exercises the coordinator against a real project directory:
//! - Membership persistence across restarts
//! - Barrier completion, timeout and shutdown
//! - Leader election by majority
//! - Task partitioning and its persisted form
//! - Recovery from corrupt state files

use std::fs;
use std::future::IntoFuture;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use coordination::events::{BarrierEvent, ElectionEvent};
use coordination::{
    CompletionReason, MessagePayload, MessageType, SignalRejection, SwarmConfig, SwarmCoordinator,
    SwarmError, TaskFields, VoteRejection, MESSAGE_TYPES,
};
use serde_json::{json, Value};
use tempfile::tempdir;

async fn open(dir: &Path) -> SwarmCoordinator {
    SwarmCoordinator::open(dir, SwarmConfig::default()).await
}

fn state_file(dir: &Path) -> std::path::PathBuf {
    dir.join(".openchamber").join("swarm-state.json")
}

fn agents(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

// ============================================================================
// Membership + persistence
// ============================================================================

#[tokio::test]
async fn test_membership_survives_restart() {
    let dir = tempdir().expect("Failed to create temp dir");

    let swarm = open(dir.path()).await;
    swarm.register_worktree_agent("agent-1", "/worktree-1");
    swarm.register_worktree_agent("agent-2", "/worktree-1");
    swarm.flush().await.unwrap();

    let contents = fs::read_to_string(state_file(dir.path())).unwrap();
    let doc: Value = serde_json::from_str(&contents).unwrap();
    assert_eq!(doc["worktreeAgents"][0]["worktree"], "/worktree-1");
    assert_eq!(doc["worktreeAgents"][0]["agents"], json!(["agent-1", "agent-2"]));
    assert_eq!(doc["taskPartitions"], json!([]));

    let reopened = open(dir.path()).await;
    assert_eq!(
        reopened.worktree_agents("/worktree-1"),
        vec!["agent-1", "agent-2"]
    );
}

#[tokio::test]
async fn test_background_write_lands_without_flush() {
    let dir = tempdir().expect("Failed to create temp dir");
    let swarm = open(dir.path()).await;
    swarm.register_worktree_agent("agent-1", "/wt");

    let path = state_file(dir.path());
    let mut written = false;
    for _ in 0..100 {
        if let Ok(contents) = fs::read_to_string(&path) {
            if contents.contains("agent-1") {
                written = true;
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(written, "registration was never persisted");
}

#[tokio::test]
async fn test_equivalent_paths_share_a_key() {
    let dir = tempdir().expect("Failed to create temp dir");
    let swarm = open(dir.path()).await;

    swarm.register_worktree_agent("agent-1", "/test/../test/worktree");

    assert_eq!(swarm.worktree_agents("/test/worktree"), vec!["agent-1"]);
    assert_eq!(swarm.all_worktrees().len(), 1);
}

#[tokio::test]
async fn test_unregister_removes_empty_worktree_from_disk() {
    let dir = tempdir().expect("Failed to create temp dir");
    let swarm = open(dir.path()).await;
    swarm.register_worktree_agent("agent-1", "/wt");
    swarm.unregister_worktree_agent("agent-1", "/wt");
    // Unknown pairs are a no-op
    assert!(!swarm.unregister_worktree_agent("ghost", "/nowhere"));
    swarm.flush().await.unwrap();

    let reopened = open(dir.path()).await;
    assert!(reopened.all_worktrees().is_empty());
}

#[tokio::test]
async fn test_corrupt_state_file_starts_empty() {
    let dir = tempdir().expect("Failed to create temp dir");
    let path = state_file(dir.path());
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "{ not json").unwrap();

    let swarm = open(dir.path()).await;
    assert_eq!(swarm.status().worktree_count, 0);

    // The next write replaces the corrupt file
    swarm.register_worktree_agent("agent-1", "/wt");
    swarm.flush().await.unwrap();
    let reopened = open(dir.path()).await;
    assert_eq!(reopened.worktree_agents("/wt"), vec!["agent-1"]);
}

#[tokio::test]
async fn test_partially_malformed_state_keeps_valid_entries() {
    let dir = tempdir().expect("Failed to create temp dir");
    let path = state_file(dir.path());
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let doc = json!({
        "worktreeAgents": [
            { "worktree": "/good", "agents": ["a"] },
            { "agents": ["orphan"] },
            { "worktree": "/good", "agents": ["b"] }
        ],
        "taskPartitions": [
            { "partitions": [] },
            {
                "partitionId": "kept",
                "partitions": [],
                "createdAt": "2024-01-01T00:00:00Z",
                "strategy": "hash",
                "agentCount": 0
            }
        ]
    });
    fs::write(&path, doc.to_string()).unwrap();

    let swarm = open(dir.path()).await;
    assert_eq!(swarm.worktree_agents("/good"), vec!["a", "b"]);
    assert!(swarm.partition("kept").is_some());
    assert_eq!(swarm.status().active_partitions, vec!["kept"]);
}

// ============================================================================
// Messaging
// ============================================================================

#[tokio::test]
async fn test_string_entry_points_reject_unknown_type() {
    let dir = tempdir().expect("Failed to create temp dir");
    let swarm = open(dir.path()).await;

    let err = swarm
        .publish_json("invalid_type", json!({}))
        .unwrap_err();
    assert!(matches!(err, SwarmError::InvalidMessageType(ref t) if t == "invalid_type"));
    assert!(err.to_string().contains("Invalid message type"));

    let err = swarm.subscribe_json("invalid_type", |_| Ok(())).unwrap_err();
    assert!(matches!(err, SwarmError::InvalidMessageType(ref t) if t == "invalid_type"));
    assert_eq!(swarm.subscriber_count(), 0);

    assert_eq!(MESSAGE_TYPES.len(), 7);
}

#[tokio::test]
async fn test_subscribe_by_name_receives_spawns() {
    let dir = tempdir().expect("Failed to create temp dir");
    let swarm = open(dir.path()).await;

    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let subscription = swarm
        .subscribe_json("spawn", move |msg| {
            if let MessagePayload::Spawn { agent_id, .. } = &msg.payload {
                sink.lock().unwrap().push(agent_id.clone());
            }
            Ok(())
        })
        .unwrap();

    swarm.register_worktree_agent("agent-1", dir.path().join("wt-1"));
    subscription.unsubscribe();
    swarm.register_worktree_agent("agent-2", dir.path().join("wt-2"));

    assert_eq!(*seen.lock().unwrap(), vec!["agent-1"]);
}

#[tokio::test]
async fn test_subscribers_see_lifecycle_messages() {
    let dir = tempdir().expect("Failed to create temp dir");
    let swarm = open(dir.path()).await;

    let seen: Arc<Mutex<Vec<MessagePayload>>> = Arc::new(Mutex::new(Vec::new()));
    for message_type in [MessageType::BarrierSync, MessageType::LeaderElection] {
        let seen = seen.clone();
        swarm.subscribe(message_type, move |msg| {
            seen.lock().unwrap().push(msg.payload.clone());
            Ok(())
        });
    }
    let mut observer = swarm.observe();

    let barrier = swarm.create_barrier("sync", agents(&["a"]), None).unwrap();
    swarm.signal_barrier("a", "sync").unwrap();
    barrier.await.unwrap();

    let election = swarm
        .conduct_election("lead", agents(&["x"]), None)
        .unwrap();
    swarm.cast_vote("lead", "v1", "x").unwrap();
    election.await.unwrap();

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 4);
    assert!(matches!(
        &seen[0],
        MessagePayload::BarrierSync(BarrierEvent::Created { expected_count: 1, .. })
    ));
    assert!(matches!(
        &seen[1],
        MessagePayload::BarrierSync(BarrierEvent::Completed { success: true, .. })
    ));
    assert!(matches!(
        &seen[2],
        MessagePayload::LeaderElection(ElectionEvent::Started { .. })
    ));
    match &seen[3] {
        MessagePayload::LeaderElection(ElectionEvent::Completed { winner, .. }) => {
            assert_eq!(winner.as_deref(), Some("x"));
        }
        other => panic!("Expected election completion, got {:?}", other),
    }

    // The observer sees the same four, in order
    for _ in 0..4 {
        let msg = observer.recv().await.unwrap();
        assert!(matches!(
            msg.message_type(),
            MessageType::BarrierSync | MessageType::LeaderElection
        ));
    }
}

// ============================================================================
// Barriers
// ============================================================================

#[tokio::test]
async fn test_barrier_resolves_when_all_signal() {
    let dir = tempdir().expect("Failed to create temp dir");
    let swarm = open(dir.path()).await;

    let wait = swarm
        .create_barrier("merge", agents(&["a", "b", "c"]), None)
        .unwrap();
    assert_eq!(wait.barrier_id(), "merge");

    let waiter = tokio::spawn(wait.into_future());
    for agent in ["c", "a", "b"] {
        swarm.signal_barrier(agent, "merge").unwrap();
    }

    let outcome = waiter.await.unwrap().unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.ready_agents, vec!["c", "a", "b"]);
    assert_eq!(outcome.reason, CompletionReason::AllReady);
}

#[tokio::test]
async fn test_duplicate_barrier_id_rejected() {
    let dir = tempdir().expect("Failed to create temp dir");
    let swarm = open(dir.path()).await;
    let _first = swarm.create_barrier("b1", agents(&["a"]), None).unwrap();

    let err = swarm.create_barrier("b1", agents(&["a"]), None).unwrap_err();
    assert!(err.to_string().contains("already exists"));
}

#[tokio::test(start_paused = true)]
async fn test_barrier_timeout_rejects_waiter() {
    let dir = tempdir().expect("Failed to create temp dir");
    let swarm = open(dir.path()).await;

    let wait = swarm
        .create_barrier("slow", agents(&["a", "b"]), Some(Duration::from_millis(100)))
        .unwrap();
    swarm.signal_barrier("a", "slow").unwrap();

    let err = wait.await.unwrap_err();
    assert!(err.to_string().contains("timeout"));
    assert!(!swarm.status().active_barriers.contains(&"slow".to_string()));

    // Late signals are told the barrier already finished
    let late = swarm.signal_barrier("b", "slow").unwrap_err();
    assert_eq!(late, SignalRejection::AlreadyCompleted);
    assert_eq!(
        serde_json::to_value(late).unwrap(),
        json!({ "success": false, "error": "already_completed" })
    );
}

#[tokio::test]
async fn test_signal_unknown_barrier() {
    let dir = tempdir().expect("Failed to create temp dir");
    let swarm = open(dir.path()).await;
    assert_eq!(
        swarm.signal_barrier("a", "never-created"),
        Err(SignalRejection::NotFound)
    );
}

// ============================================================================
// Elections
// ============================================================================

#[tokio::test]
async fn test_election_majority_of_two() {
    let dir = tempdir().expect("Failed to create temp dir");
    let swarm = open(dir.path()).await;

    let wait = swarm
        .conduct_election("lead", agents(&["x", "y"]), None)
        .unwrap();
    assert_eq!(wait.election_id(), "lead");
    swarm.cast_vote("lead", "voter1", "x").unwrap();
    swarm.cast_vote("lead", "voter2", "x").unwrap();

    let outcome = wait.await.unwrap();
    assert_eq!(outcome.winner, "x");
    assert_eq!(outcome.votes.len(), 2);
}

#[tokio::test]
async fn test_invalid_candidate_vote() {
    let dir = tempdir().expect("Failed to create temp dir");
    let swarm = open(dir.path()).await;
    let _wait = swarm
        .conduct_election("lead", agents(&["x", "y"]), None)
        .unwrap();

    let rejection = swarm.cast_vote("lead", "voter1", "z").unwrap_err();
    assert_eq!(rejection, VoteRejection::InvalidCandidate);
    assert_eq!(
        serde_json::to_value(rejection).unwrap(),
        json!({ "success": false, "error": "invalid_candidate" })
    );
}

#[tokio::test(start_paused = true)]
async fn test_split_vote_times_out() {
    let dir = tempdir().expect("Failed to create temp dir");
    let swarm = open(dir.path()).await;

    let wait = swarm
        .conduct_election("split", agents(&["x", "y", "z"]), None)
        .unwrap();
    swarm.cast_vote("split", "v1", "x").unwrap();
    swarm.cast_vote("split", "v2", "y").unwrap();

    // Default election timeout is 30s
    let err = wait.await.unwrap_err();
    assert_eq!(err.reason(), Some(CompletionReason::Timeout));
}

// ============================================================================
// Partitioning
// ============================================================================

#[tokio::test]
async fn test_partition_task_persists() {
    let dir = tempdir().expect("Failed to create temp dir");
    let swarm = open(dir.path()).await;

    let mut task = TaskFields::new();
    task.insert("goal".to_string(), json!("migrate"));
    task.insert("files".to_string(), json!(["a.rs", "b.rs"]));

    let partitions = swarm
        .partition_task("migrate", &task, 3, "round-robin")
        .unwrap();

    assert_eq!(partitions.len(), 3);
    for (i, p) in partitions.iter().enumerate() {
        assert_eq!(p.agent_index, i);
        assert_eq!(p.partition_id, format!("migrate-{}", i));
        assert_eq!(p.task.partition_index, i);
        assert_eq!(p.task.total_partitions, 3);
        assert_eq!(p.task.fields["goal"], "migrate");
    }

    swarm.flush().await.unwrap();

    let doc: Value =
        serde_json::from_str(&fs::read_to_string(state_file(dir.path())).unwrap()).unwrap();
    let set = &doc["taskPartitions"][0];
    assert_eq!(set["partitionId"], "migrate");
    assert_eq!(set["strategy"], "round-robin");
    assert_eq!(set["agentCount"], 3);
    assert_eq!(set["partitions"][1]["task"]["partitionIndex"], 1);
    assert_eq!(set["partitions"][1]["task"]["goal"], "migrate");

    let reopened = open(dir.path()).await;
    assert_eq!(reopened.partition("migrate").unwrap().partitions, partitions);
}

#[tokio::test]
async fn test_partition_rejects_unknown_strategy() {
    let dir = tempdir().expect("Failed to create temp dir");
    let swarm = open(dir.path()).await;

    let err = swarm
        .partition_task("p", &TaskFields::new(), 2, "random")
        .unwrap_err();
    assert!(matches!(err, SwarmError::UnknownStrategy(ref s) if s == "random"));
    assert!(swarm.partition("p").is_none());
}

// ============================================================================
// Cleanup
// ============================================================================

#[tokio::test]
async fn test_cleanup_fails_everything_pending() {
    let dir = tempdir().expect("Failed to create temp dir");
    let swarm = open(dir.path()).await;

    let barriers: Vec<_> = ["b1", "b2"]
        .iter()
        .map(|id| swarm.create_barrier(id, agents(&["a"]), None).unwrap())
        .collect();
    let election = swarm
        .conduct_election("lead", agents(&["x", "y"]), None)
        .unwrap();
    swarm.subscribe(MessageType::Spawn, |_| Ok(()));
    swarm
        .partition_task("p", &TaskFields::new(), 2, "hash")
        .unwrap();

    let report = swarm.cleanup();
    assert!(report.success);
    assert_eq!(report.barriers_failed, 2);
    assert_eq!(report.elections_failed, 1);

    for barrier in barriers {
        let err = barrier.await.unwrap_err();
        assert_eq!(err.reason(), Some(CompletionReason::Shutdown));
        assert!(err.to_string().contains("shutdown"));
    }
    assert_eq!(
        election.await.unwrap_err().reason(),
        Some(CompletionReason::Shutdown)
    );

    let status = swarm.status();
    assert!(status.active_barriers.is_empty());
    assert!(status.active_elections.is_empty());
    assert!(status.active_partitions.is_empty());
    assert_eq!(swarm.subscriber_count(), 0);
}
