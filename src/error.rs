//! Error types for matchfeed
//!
//! Centralized error handling using thiserror. Component errors live next to
//! the component that raises them and convert into `FeedError`.

use thiserror::Error;

use crate::domain::{TaskError, ValidationError};
use crate::pool::FetchError;
use crate::preload::ImageError;
use crate::swipe::SubmitError;

/// All error types that can surface from the feed engine
#[derive(Debug, Error)]
pub enum FeedError {
    /// Candidate fetch failed (offline, timeout, server error)
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Swipe submission failed
    #[error("Submit error: {0}")]
    Submit(#[from] SubmitError),

    /// A match task failed
    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    /// A candidate item failed validation
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Image preload failed
    #[error("Image error: {0}")]
    Image(#[from] ImageError),

    /// Invalid operation for the current feed state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// HTTP client construction error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FeedError {
    /// Whether the user can recover by retrying the operation.
    pub fn is_recoverable(&self) -> bool {
        match self {
            FeedError::Fetch(e) => !matches!(e, FetchError::Superseded),
            FeedError::Submit(_) | FeedError::Image(_) | FeedError::Task(_) => true,
            FeedError::Validation(_) | FeedError::InvalidState(_) => false,
            FeedError::Http(_) | FeedError::Io(_) | FeedError::Json(_) => false,
        }
    }
}

/// Result type alias for matchfeed operations
pub type Result<T> = std::result::Result<T, FeedError>;
