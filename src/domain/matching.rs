//! Match outcomes: what the swipe service reports and what reaches the UI.

use std::fmt;
use std::future::Future;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::candidate::Candidate;

/// Reply of the swipe service for one submitted swipe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResult {
    #[serde(default)]
    pub is_match: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<Conversation>,
}

impl SubmitResult {
    pub fn no_match() -> Self {
        Self::default()
    }

    pub fn matched(score: f64) -> Self {
        Self {
            is_match: true,
            score: Some(score),
            conversation: None,
        }
    }

    pub fn with_conversation(mut self, id: impl Into<String>) -> Self {
        self.conversation = Some(Conversation { id: id.into() });
        self
    }
}

/// Conversation opened by a mutual match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
}

/// A confirmed match, delivered to the notification sink exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchEvent {
    pub matched_user: Candidate,
    pub score: f64,
    pub conversation: Option<Conversation>,
}

impl MatchEvent {
    /// Build the event for a positive outcome. The service score wins over
    /// the candidate's feed score.
    pub fn from_outcome(candidate: Candidate, outcome: SubmitResult) -> Self {
        let score = outcome.score.unwrap_or(candidate.score);
        Self {
            matched_user: candidate,
            score,
            conversation: outcome.conversation,
        }
    }
}

/// Failure of a single match task. Isolated to that task.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("Swipe submission failed: {0}")]
    Submission(String),

    #[error("Submission abandoned before it resolved")]
    Abandoned,
}

/// Pending outcome of a submitted like.
pub struct MatchTask {
    pub candidate: Candidate,
    pub outcome: BoxFuture<'static, Result<SubmitResult, TaskError>>,
}

impl MatchTask {
    pub fn new<F>(candidate: Candidate, outcome: F) -> Self
    where
        F: Future<Output = Result<SubmitResult, TaskError>> + Send + 'static,
    {
        Self {
            candidate,
            outcome: outcome.boxed(),
        }
    }

    /// Task whose outcome is already known
    pub fn resolved(candidate: Candidate, outcome: Result<SubmitResult, TaskError>) -> Self {
        Self::new(candidate, futures::future::ready(outcome))
    }
}

impl fmt::Debug for MatchTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatchTask")
            .field("candidate", &self.candidate.id)
            .finish_non_exhaustive()
    }
}
