//! Shared completion bookkeeping for barriers and elections

use std::collections::{HashSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

/// Why a barrier or election stopped being active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    /// Every expected agent signalled the barrier
    AllReady,
    /// A candidate reached a strict majority
    Majority,
    /// The wall-clock timeout fired first
    Timeout,
    /// The coordinator was cleaned up
    Shutdown,
}

impl CompletionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionReason::AllReady => "all_ready",
            CompletionReason::Majority => "majority",
            CompletionReason::Timeout => "timeout",
            CompletionReason::Shutdown => "shutdown",
        }
    }

    /// Whether completing for this reason counts as success
    pub fn is_success(&self) -> bool {
        matches!(self, CompletionReason::AllReady | CompletionReason::Majority)
    }
}

impl fmt::Display for CompletionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize)]
struct Rejection<'a> {
    success: bool,
    error: &'a str,
}

/// Serialize a rejection as `{"success": false, "error": "<code>"}`
pub(crate) fn serialize_rejection<S: Serializer>(code: &str, serializer: S) -> Result<S::Ok, S::Error> {
    Rejection {
        success: false,
        error: code,
    }
    .serialize(serializer)
}

/// Bounded memory of recently finished ids.
///
/// Lets a late signal or vote be told `already_completed` rather than
/// `not_found`. Oldest ids are forgotten first.
#[derive(Debug, Default)]
pub(crate) struct Tombstones {
    capacity: usize,
    order: VecDeque<String>,
    ids: HashSet<String>,
}

impl Tombstones {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::new(),
            ids: HashSet::new(),
        }
    }

    pub(crate) fn record(&mut self, id: &str) {
        if self.capacity == 0 || !self.ids.insert(id.to_string()) {
            return;
        }
        self.order.push_back(id.to_string());
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Forget an id, e.g. when it is reused for a new barrier
    pub(crate) fn forget(&mut self, id: &str) {
        if self.ids.remove(id) {
            self.order.retain(|existing| existing != id);
        }
    }

    pub(crate) fn clear(&mut self) {
        self.order.clear();
        self.ids.clear();
    }
}
