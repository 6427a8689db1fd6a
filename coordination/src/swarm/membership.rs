//! Worktree → agent membership
//!
//! Invariant: a worktree key is present iff its agent set is non-empty.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};

use crate::state::WorktreeEntry;

/// Resolve `path` against `base` and fold `.`/`..` segments lexically.
///
/// The file system is not consulted, so symlinks are kept as written and the
/// path does not need to exist. `..` at the root stays at the root.
pub fn normalize_path(base: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };

    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(segment) => out.push(segment),
        }
    }
    out
}

/// Mapping from normalized worktree path to the agents working in it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorktreeRegistry {
    worktrees: BTreeMap<PathBuf, BTreeSet<String>>,
}

impl WorktreeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted entries, normalizing every key against `base`
    pub fn from_entries(base: &Path, entries: &[WorktreeEntry]) -> Self {
        let mut registry = Self::new();
        for entry in entries {
            let worktree = normalize_path(base, Path::new(&entry.worktree));
            for agent in &entry.agents {
                registry.insert(agent, worktree.clone());
            }
        }
        registry
    }

    /// Add an agent to an already-normalized worktree. Returns `false` if it
    /// was already registered there.
    pub fn insert(&mut self, agent_id: &str, worktree: PathBuf) -> bool {
        self.worktrees
            .entry(worktree)
            .or_default()
            .insert(agent_id.to_string())
    }

    /// Remove an agent, dropping the worktree once it has no agents left
    pub fn remove(&mut self, agent_id: &str, worktree: &Path) -> bool {
        let Some(agents) = self.worktrees.get_mut(worktree) else {
            return false;
        };
        let removed = agents.remove(agent_id);
        if agents.is_empty() {
            self.worktrees.remove(worktree);
        }
        removed
    }

    /// Agents registered under a worktree
    pub fn agents(&self, worktree: &Path) -> Vec<String> {
        self.worktrees
            .get(worktree)
            .map(|agents| agents.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every worktree with at least one agent
    pub fn worktrees(&self) -> Vec<PathBuf> {
        self.worktrees.keys().cloned().collect()
    }

    /// Worktrees an agent is registered under
    pub fn worktrees_for(&self, agent_id: &str) -> Vec<PathBuf> {
        self.worktrees
            .iter()
            .filter(|(_, agents)| agents.contains(agent_id))
            .map(|(worktree, _)| worktree.clone())
            .collect()
    }

    pub fn contains_worktree(&self, worktree: &Path) -> bool {
        self.worktrees.contains_key(worktree)
    }

    /// Number of worktrees
    pub fn len(&self) -> usize {
        self.worktrees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.worktrees.is_empty()
    }

    /// Sum of per-worktree agent counts (an agent in two worktrees counts twice)
    pub fn total_agents(&self) -> usize {
        self.worktrees.values().map(BTreeSet::len).sum()
    }

    /// Persistable form
    pub fn entries(&self) -> Vec<WorktreeEntry> {
        self.worktrees
            .iter()
            .map(|(worktree, agents)| WorktreeEntry {
                worktree: worktree.to_string_lossy().into_owned(),
                agents: agents.iter().cloned().collect(),
            })
            .collect()
    }
}
