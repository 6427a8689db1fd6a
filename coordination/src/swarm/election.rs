//! Leader election
//!
//! A candidate wins once it holds strictly more than half of the *candidate
//! count* in votes (not half of the votes cast). Each voter's latest vote
//! replaces any earlier one. Ties never resolve on their own; the election
//! then ends by timeout or shutdown without a winner.

use std::collections::BTreeMap;
use std::future::IntoFuture;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize, Serializer};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use super::outcome::{serialize_rejection, CompletionReason};
use crate::events::ElectionEvent;

/// Result delivered to whoever awaits an election
pub type ElectionResult = Result<ElectionOutcome, ElectionError>;

/// One recorded vote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub voter_id: String,
    pub candidate_id: String,
}

/// Successful election completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectionOutcome {
    pub election_id: String,
    pub winner: String,
    pub votes: Vec<Vote>,
    pub completed_at: DateTime<Utc>,
    pub reason: CompletionReason,
}

/// Election ended without a winner
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ElectionError {
    #[error("Election {election_id} failed: {reason}")]
    Failed {
        election_id: String,
        reason: CompletionReason,
        votes: Vec<Vote>,
    },

    #[error("Election {0} was dropped before completing")]
    Dropped(String),
}

impl ElectionError {
    pub fn reason(&self) -> Option<CompletionReason> {
        match self {
            ElectionError::Failed { reason, .. } => Some(*reason),
            ElectionError::Dropped(_) => None,
        }
    }
}

/// Why a vote was not accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VoteRejection {
    #[error("not_found")]
    NotFound,

    #[error("already_completed")]
    AlreadyCompleted,

    #[error("invalid_candidate")]
    InvalidCandidate,
}

impl VoteRejection {
    pub fn code(&self) -> &'static str {
        match self {
            VoteRejection::NotFound => "not_found",
            VoteRejection::AlreadyCompleted => "already_completed",
            VoteRejection::InvalidCandidate => "invalid_candidate",
        }
    }
}

impl Serialize for VoteRejection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize_rejection(self.code(), serializer)
    }
}

/// Pending completion of an election
#[derive(Debug)]
pub struct ElectionWait {
    election_id: String,
    receiver: oneshot::Receiver<ElectionResult>,
}

impl ElectionWait {
    pub fn election_id(&self) -> &str {
        &self.election_id
    }

    /// Wait for a winner, a timeout or shutdown
    pub async fn wait(self) -> ElectionResult {
        match self.receiver.await {
            Ok(result) => result,
            Err(_) => Err(ElectionError::Dropped(self.election_id)),
        }
    }
}

impl IntoFuture for ElectionWait {
    type Output = ElectionResult;
    type IntoFuture = BoxFuture<'static, ElectionResult>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

/// Live state of an active election
pub(crate) struct ElectionState {
    pub(crate) id: String,
    pub(crate) candidates: Vec<String>,
    /// voter → candidate
    pub(crate) votes: BTreeMap<String, String>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) timeout: Duration,
    pub(crate) generation: u64,
    completion: Option<oneshot::Sender<ElectionResult>>,
    timer: Option<JoinHandle<()>>,
}

impl ElectionState {
    /// Duplicate candidate ids are collapsed, keeping first-seen order
    pub(crate) fn new(
        id: String,
        candidates: Vec<String>,
        timeout: Duration,
    ) -> (Self, ElectionWait) {
        let mut unique: Vec<String> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if !unique.contains(&candidate) {
                unique.push(candidate);
            }
        }

        let (tx, rx) = oneshot::channel();
        let wait = ElectionWait {
            election_id: id.clone(),
            receiver: rx,
        };
        let state = Self {
            id,
            candidates: unique,
            votes: BTreeMap::new(),
            created_at: Utc::now(),
            timeout,
            generation: 0,
            completion: Some(tx),
            timer: None,
        };
        (state, wait)
    }

    pub(crate) fn arm(&mut self, generation: u64, timer: JoinHandle<()>) {
        self.generation = generation;
        self.timer = Some(timer);
    }

    /// Record or overwrite a voter's choice
    pub(crate) fn cast(&mut self, voter_id: &str, candidate_id: &str) -> Result<Vec<Vote>, VoteRejection> {
        if !self.candidates.iter().any(|c| c == candidate_id) {
            return Err(VoteRejection::InvalidCandidate);
        }
        self.votes
            .insert(voter_id.to_string(), candidate_id.to_string());
        Ok(self.vote_list())
    }

    pub(crate) fn vote_list(&self) -> Vec<Vote> {
        self.votes
            .iter()
            .map(|(voter, candidate)| Vote {
                voter_id: voter.clone(),
                candidate_id: candidate.clone(),
            })
            .collect()
    }

    /// Votes per candidate, including candidates with none
    pub(crate) fn tally(&self) -> BTreeMap<String, usize> {
        let mut counts: BTreeMap<String, usize> =
            self.candidates.iter().map(|c| (c.clone(), 0)).collect();
        for candidate in self.votes.values() {
            *counts.entry(candidate.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// The unique candidate above the majority threshold, if any
    pub(crate) fn leader(&self) -> Option<String> {
        let field = self.candidates.len();
        let mut above: Vec<String> = self
            .tally()
            .into_iter()
            .filter(|(_, count)| count * 2 > field)
            .map(|(candidate, _)| candidate)
            .collect();

        if above.len() == 1 {
            above.pop()
        } else {
            if above.len() > 1 {
                debug!(election_id = %self.id, tied = ?above, "Multiple candidates above majority");
            }
            None
        }
    }

    /// Resolve the waiter and stop the timer. `winner` is `None` for timeout
    /// and shutdown.
    pub(crate) fn finish(mut self, winner: Option<String>, reason: CompletionReason) -> ElectionEvent {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }

        let votes = self.vote_list();
        let result = match winner.clone() {
            Some(winner) => Ok(ElectionOutcome {
                election_id: self.id.clone(),
                winner,
                votes,
                completed_at: Utc::now(),
                reason,
            }),
            None => Err(ElectionError::Failed {
                election_id: self.id.clone(),
                reason,
                votes,
            }),
        };

        if let Some(tx) = self.completion.take() {
            let _ = tx.send(result);
        }

        ElectionEvent::Completed {
            election_id: self.id,
            winner,
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn election(candidates: &[&str]) -> (ElectionState, ElectionWait) {
        ElectionState::new(
            "e1".to_string(),
            candidates.iter().map(|s| s.to_string()).collect(),
            Duration::from_secs(30),
        )
    }

    #[test]
    fn test_majority_of_candidate_count() {
        let (mut state, _wait) = election(&["x", "y"]);

        state.cast("voter1", "x").unwrap();
        assert_eq!(state.leader(), None);

        state.cast("voter2", "x").unwrap();
        assert_eq!(state.leader(), Some("x".to_string()));
    }

    #[test]
    fn test_single_candidate_wins_on_first_vote() {
        let (mut state, _wait) = election(&["solo"]);
        state.cast("voter1", "solo").unwrap();
        assert_eq!(state.leader(), Some("solo".to_string()));
    }

    #[test]
    fn test_revote_overwrites() {
        let (mut state, _wait) = election(&["x", "y", "z"]);
        state.cast("voter1", "x").unwrap();
        let votes = state.cast("voter1", "y").unwrap();

        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].candidate_id, "y");
        assert_eq!(state.tally()["x"], 0);
    }

    #[test]
    fn test_tie_above_threshold_has_no_leader() {
        let (mut state, _wait) = election(&["x", "y"]);
        state.cast("v1", "x").unwrap();
        state.cast("v2", "x").unwrap();
        state.cast("v3", "y").unwrap();
        state.cast("v4", "y").unwrap();

        assert_eq!(state.leader(), None);
    }

    #[test]
    fn test_invalid_candidate_rejected() {
        let (mut state, _wait) = election(&["x", "y"]);
        assert_eq!(state.cast("v1", "z"), Err(VoteRejection::InvalidCandidate));
        assert!(state.votes.is_empty());
    }

    #[test]
    fn test_duplicate_candidates_collapse() {
        let (state, wait) = election(&["x", "x", "y"]);
        assert_eq!(state.candidates, vec!["x", "y"]);
        assert_eq!(wait.election_id(), "e1");
    }

    #[tokio::test]
    async fn test_finish_without_winner_rejects() {
        let (mut state, wait) = election(&["x", "y"]);
        state.cast("v1", "x").unwrap();

        let event = state.finish(None, CompletionReason::Timeout);
        assert!(matches!(event, ElectionEvent::Completed { winner: None, .. }));

        match wait.await {
            Err(ElectionError::Failed { reason, votes, .. }) => {
                assert_eq!(reason, CompletionReason::Timeout);
                assert_eq!(votes.len(), 1);
            }
            other => panic!("Expected Failed, got {:?}", other),
        }
    }

    #[test]
    fn test_rejection_codes() {
        assert_eq!(VoteRejection::InvalidCandidate.code(), "invalid_candidate");
        let json = serde_json::to_value(VoteRejection::NotFound).unwrap();
        assert_eq!(json["error"], "not_found");
        assert_eq!(json["success"], false);
    }
}
