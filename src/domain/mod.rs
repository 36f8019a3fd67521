//! Domain types for the match feed
//!
//! - Candidate: a prospective match, validated from the wire form
//! - SwipeRecord: one entry of the swipe history
//! - MatchTask / MatchEvent: pending and confirmed match outcomes
//! - Filters: opaque fetch filters

pub mod candidate;
pub mod filters;
pub mod matching;
pub mod swipe;

pub use candidate::{Candidate, CandidateId, ProfileSnapshot, RawCandidate, ValidationError};
pub use filters::Filters;
pub use matching::{Conversation, MatchEvent, MatchTask, SubmitResult, TaskError};
pub use swipe::{SwipeDirection, SwipeRecord};
