//! Coordinator configuration
//!
//! Defaults mirror the behaviour expected by the agent spawn/consolidation
//! endpoints: state lives under `<project>/.openchamber/swarm-state.json`,
//! barriers wait five minutes and elections thirty seconds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

/// Default directory (relative to the project) holding coordinator state
pub const DEFAULT_STATE_DIR: &str = ".openchamber";

/// Default snapshot file name inside the state directory
pub const DEFAULT_STATE_FILE: &str = "swarm-state.json";

/// Default barrier timeout (5 minutes)
pub const DEFAULT_BARRIER_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Default election timeout (30 seconds)
pub const DEFAULT_ELECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for a [`crate::swarm::SwarmCoordinator`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwarmConfig {
    /// Directory name, relative to the project directory, for persisted state
    pub state_dir_name: String,

    /// File name of the JSON snapshot inside `state_dir_name`
    pub state_file_name: String,

    /// Timeout applied when `create_barrier` is called without one
    pub default_barrier_timeout: Duration,

    /// Timeout applied when `conduct_election` is called without one
    pub default_election_timeout: Duration,

    /// How many finished barrier/election ids are remembered so that late
    /// signals and votes report `already_completed` instead of `not_found`
    pub tombstone_capacity: usize,

    /// Buffer size of the "message received" observer channel
    pub observer_capacity: usize,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            state_dir_name: DEFAULT_STATE_DIR.to_string(),
            state_file_name: DEFAULT_STATE_FILE.to_string(),
            default_barrier_timeout: DEFAULT_BARRIER_TIMEOUT,
            default_election_timeout: DEFAULT_ELECTION_TIMEOUT,
            tombstone_capacity: 256,
            observer_capacity: 256,
        }
    }
}

/// On-disk TOML shape. Every key is optional and falls back to the default.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SwarmConfigFile {
    state_dir: Option<String>,
    state_file: Option<String>,
    barrier_timeout_ms: Option<u64>,
    election_timeout_ms: Option<u64>,
    tombstone_capacity: Option<usize>,
    observer_capacity: Option<usize>,
}

impl SwarmConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Load config from a TOML file, then apply environment overrides
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse swarm config {}", path.display()))?;
        config.apply_env();
        Ok(config)
    }

    /// Parse config from a TOML string without consulting the environment
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let file: SwarmConfigFile = toml::from_str(content)?;
        let mut config = Self::default();

        if let Some(dir) = file.state_dir {
            config.state_dir_name = dir;
        }
        if let Some(name) = file.state_file {
            config.state_file_name = name;
        }
        if let Some(ms) = file.barrier_timeout_ms {
            config.default_barrier_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = file.election_timeout_ms {
            config.default_election_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = file.tombstone_capacity {
            config.tombstone_capacity = n;
        }
        if let Some(n) = file.observer_capacity {
            config.observer_capacity = n.max(1);
        }

        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var("SWARM_STATE_DIR") {
            self.state_dir_name = dir;
        }
        if let Ok(name) = std::env::var("SWARM_STATE_FILE") {
            self.state_file_name = name;
        }
        if let Ok(ms) = std::env::var("SWARM_BARRIER_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                self.default_barrier_timeout = Duration::from_millis(ms);
            }
        }
        if let Ok(ms) = std::env::var("SWARM_ELECTION_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                self.default_election_timeout = Duration::from_millis(ms);
            }
        }
        if let Ok(n) = std::env::var("SWARM_TOMBSTONE_CAPACITY") {
            if let Ok(n) = n.parse() {
                self.tombstone_capacity = n;
            }
        }
    }

    /// Path of the snapshot file for a project directory
    pub fn state_path(&self, directory: &Path) -> PathBuf {
        directory
            .join(&self.state_dir_name)
            .join(&self.state_file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SwarmConfig::default();
        assert_eq!(config.default_barrier_timeout, Duration::from_secs(300));
        assert_eq!(config.default_election_timeout, Duration::from_secs(30));
        assert_eq!(
            config.state_path(Path::new("/project")),
            PathBuf::from("/project/.openchamber/swarm-state.json")
        );
    }

    #[test]
    fn test_toml_partial_override() {
        let config = SwarmConfig::from_toml_str(
            r#"
            barrier_timeout_ms = 1500
            state_file = "state.json"
            "#,
        )
        .unwrap();

        assert_eq!(config.default_barrier_timeout, Duration::from_millis(1500));
        assert_eq!(config.state_file_name, "state.json");
        assert_eq!(config.state_dir_name, DEFAULT_STATE_DIR);
        assert_eq!(config.default_election_timeout, DEFAULT_ELECTION_TIMEOUT);
    }

    #[test]
    fn test_toml_rejects_wrong_types() {
        assert!(SwarmConfig::from_toml_str("barrier_timeout_ms = \"soon\"").is_err());
    }
}
