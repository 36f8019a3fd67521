//! Candidate fetch contract and its HTTP implementation.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Filters, SwipeDirection};

/// Errors that can occur while fetching a page of candidates
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("Request timed out")]
    Timeout,

    #[error("Server error {status}: {message}")]
    ServerError { status: u16, message: String },

    #[error("No network connection")]
    Offline,

    /// A newer primary fetch replaced this one; its result was discarded.
    #[error("Fetch superseded by a newer request")]
    Superseded,
}

/// Classification of a `FetchError`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchErrorKind {
    Timeout,
    ServerError,
    Offline,
    Superseded,
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::Timeout => FetchErrorKind::Timeout,
            FetchError::ServerError { .. } => FetchErrorKind::ServerError,
            FetchError::Offline => FetchErrorKind::Offline,
            FetchError::Superseded => FetchErrorKind::Superseded,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout => true,
            FetchError::ServerError { .. } => true,
            FetchError::Offline => false,
            FetchError::Superseded => false,
        }
    }
}

/// Hints sent alongside a page request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchExtra {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_swipe_direction: Option<SwipeDirection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_details: Option<bool>,
}

/// One page request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    pub page: u32,
    pub filters: Filters,
    pub limit: usize,
    pub extra: FetchExtra,
}

/// One page response. Items are validated by the pool, so they stay raw here.
/// A page shorter than the requested limit signals exhaustion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchResponse {
    #[serde(default)]
    pub items: Vec<Value>,
}

impl FetchResponse {
    pub fn new(items: Vec<Value>) -> Self {
        Self { items }
    }
}

/// Source of candidate pages
#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError>;
}

/// Configuration for `HttpCandidateSource`
#[derive(Debug, Clone)]
pub struct HttpSourceConfig {
    /// Base URL; pages are requested from `{base_url}/candidates`
    pub base_url: String,
    pub request_timeout: Duration,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".to_string(),
            request_timeout: Duration::from_secs(15),
        }
    }
}

/// Candidate source backed by an HTTP endpoint.
pub struct HttpCandidateSource {
    client: reqwest::Client,
    config: HttpSourceConfig,
}

impl HttpCandidateSource {
    pub fn new(config: HttpSourceConfig) -> crate::error::Result<Self> {
        let client = reqwest::Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { client, config })
    }

    /// Endpoint that serves candidate pages
    pub fn endpoint(&self) -> String {
        format!("{}/candidates", self.config.base_url.trim_end_matches('/'))
    }

    /// Flatten a request into query parameters.
    pub fn query_params(request: &FetchRequest) -> Vec<(String, String)> {
        let mut params = vec![
            ("page".to_string(), request.page.to_string()),
            ("limit".to_string(), request.limit.to_string()),
        ];
        if let Some(personality) = &request.filters.personality_type {
            params.push(("personalityType".to_string(), personality.clone()));
        }
        if let Some(budget) = request.filters.budget {
            params.push(("budget".to_string(), budget.to_string()));
        }
        if !request.filters.interests.is_empty() {
            let interests: Vec<&str> = request.filters.interests.iter().map(String::as_str).collect();
            params.push(("interests".to_string(), interests.join(",")));
        }
        if let Some(direction) = request.extra.last_swipe_direction {
            params.push(("lastSwipeDirection".to_string(), direction.to_string()));
        }
        if let Some(include) = request.extra.include_details {
            params.push(("includeDetails".to_string(), include.to_string()));
        }
        params
    }
}

fn map_transport_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::Timeout;
    }
    FetchError::ServerError {
        status: err.status().map(|s| s.as_u16()).unwrap_or(0),
        message: err.to_string(),
    }
}

#[async_trait]
impl CandidateSource for HttpCandidateSource {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let response = self
            .client
            .get(self.endpoint())
            .query(&Self::query_params(&request))
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(FetchError::ServerError {
                status: status.as_u16(),
                message,
            });
        }

        response.json::<FetchResponse>().await.map_err(|e| FetchError::ServerError {
            status: status.as_u16(),
            message: format!("invalid response body: {}", e),
        })
    }
}
