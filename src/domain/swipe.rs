//! Swipe decisions and the history records they leave behind.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::candidate::Candidate;

/// A user decision on the current card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwipeDirection {
    Like,
    Pass,
}

impl SwipeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwipeDirection::Like => "like",
            SwipeDirection::Pass => "pass",
        }
    }

    /// Only likes are submitted to the swipe service.
    pub fn is_like(&self) -> bool {
        matches!(self, SwipeDirection::Like)
    }
}

impl fmt::Display for SwipeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SwipeDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "like" | "l" | "right" => Ok(SwipeDirection::Like),
            "pass" | "p" | "left" => Ok(SwipeDirection::Pass),
            other => Err(format!("unknown swipe direction: {}", other)),
        }
    }
}

/// One entry of the swipe history. Appended on swipe, popped on undo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwipeRecord {
    /// Monotonic sequence number, never reused within a feed
    pub seq: u64,
    pub candidate: Candidate,
    pub direction: SwipeDirection,
    pub at: DateTime<Utc>,
}
