//! Durable swarm state
//!
//! Worktree membership and task partitions are persisted as one JSON
//! document under the project directory:
//!
//! ```text
//! <project>/.openchamber/swarm-state.json
//! {
//!   "worktreeAgents": [ { "worktree": "/abs/path", "agents": ["agent-1"] } ],
//!   "taskPartitions": [ { "partitionId": "build", "partitions": [...], ... } ]
//! }
//! ```
//!
//! - `types`: the persisted shapes
//! - `store`: backends (file, memory) and lenient decoding
//! - `writer`: the coalescing, serialized write queue

pub mod store;
pub mod types;
pub mod writer;

pub use store::{
    decode_snapshot, encode_snapshot, JsonFileBackend, MemoryBackend, SnapshotBackend,
    SnapshotStore, StoreError, StoreResult,
};
pub use types::{
    PartitionDescriptor, PartitionSet, PartitionStrategy, PartitionedTask, PersistedSnapshot,
    TaskFields, WorktreeEntry,
};
pub use writer::{PersistQueue, SnapshotSource};
