//! Candidate pool: pagination, dedup, fetch lifecycle and top-up.
//!
//! - `source`: the fetch contract (`CandidateSource`) and its HTTP client
//! - `state`: the owned `FeedState` and its synchronous transitions
//! - `candidate_pool`: async orchestration of primary fetches and top-ups

mod candidate_pool;
mod source;
mod state;

pub use candidate_pool::{CandidatePool, FetchOptions, FetchOutcome, PoolConfig, SharedState};
pub use source::{
    CandidateSource, FetchError, FetchErrorKind, FetchExtra, FetchRequest, FetchResponse, HttpCandidateSource,
    HttpSourceConfig,
};
pub use state::{FeedSnapshot, FeedState, FetchState, FetchStatus, MergeOutcome};
