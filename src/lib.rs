//! Matchfeed - a swipe-and-match orchestration engine
//!
//! Candidates are fetched page by page, shown one at a time and accepted or
//! rejected with a swipe. Likes are submitted to a remote service that may
//! report a mutual match; matches are delivered to the UI in score order,
//! one at a time.
//!
//! `MatchFeed` is the entry point. Every external capability (candidate
//! source, swipe service, notification and analytics sinks, image fetcher)
//! is a trait injected through `FeedDeps`.

pub mod cli;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod gesture;
pub mod id;
pub mod matches;
pub mod mock;
pub mod network;
pub mod pool;
pub mod preload;
pub mod registry;
pub mod retry;
pub mod sinks;
pub mod swipe;

mod sync;

pub use engine::{FeedConfig, FeedDeps, MatchFeed, ResourceHandle};
pub use error::{FeedError, Result};
