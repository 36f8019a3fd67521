//! Match delivery
//!
//! Pending like outcomes are collected by `MatchQueue`, awaited in small
//! batches and delivered to the notification sink best score first, one at a
//! time.

mod queue;

pub use queue::{MatchQueue, MatchQueueConfig};
