//! Candidate records and wire-level validation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identifier of a candidate, unique within a pool.
pub type CandidateId = String;

/// Reasons a fetched item is rejected before it reaches the pool.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Malformed candidate: {0}")]
    Malformed(String),
}

/// Candidate as it arrives from the fetch contract, every field optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawCandidate {
    pub id: Option<Value>,
    pub name: Option<String>,
    pub match_criteria: Option<Value>,
    pub score: Option<f64>,
    #[serde(default)]
    pub photos: Vec<String>,
    pub bio: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Profile data shown on the card. Opaque to the engine apart from `photos`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSnapshot {
    pub name: String,
    pub match_criteria: Value,
    #[serde(default)]
    pub photos: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// A prospective match shown to the user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub id: CandidateId,
    pub score: f64,
    pub profile: ProfileSnapshot,
    pub preloaded: bool,
}

impl Candidate {
    /// Build a candidate directly, bypassing wire validation.
    pub fn new(id: impl Into<String>, name: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            score,
            profile: ProfileSnapshot {
                name: name.into(),
                match_criteria: Value::Object(Map::new()),
                photos: Vec::new(),
                bio: None,
                extra: Map::new(),
            },
            preloaded: false,
        }
    }

    /// Attach photo URLs to the profile
    pub fn with_photos<I, S>(mut self, photos: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.profile.photos = photos.into_iter().map(Into::into).collect();
        self
    }

    /// Parse and validate one item of a fetch response.
    pub fn from_value(value: Value) -> Result<Self, ValidationError> {
        let raw: RawCandidate =
            serde_json::from_value(value).map_err(|e| ValidationError::Malformed(e.to_string()))?;
        Self::from_raw(raw)
    }

    /// Validate a raw item. `id`, `name` and `matchCriteria` are required;
    /// a missing score counts as zero.
    pub fn from_raw(raw: RawCandidate) -> Result<Self, ValidationError> {
        let id = match raw.id {
            Some(Value::String(s)) if !s.trim().is_empty() => s,
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::String(_)) | None | Some(Value::Null) => return Err(ValidationError::MissingField("id")),
            Some(other) => return Err(ValidationError::Malformed(format!("unsupported id: {}", other))),
        };
        let name = raw
            .name
            .filter(|n| !n.trim().is_empty())
            .ok_or(ValidationError::MissingField("name"))?;
        let match_criteria = raw.match_criteria.ok_or(ValidationError::MissingField("matchCriteria"))?;
        let score = raw.score.unwrap_or(0.0);
        if !score.is_finite() {
            return Err(ValidationError::Malformed(format!("non-finite score for {}", id)));
        }

        Ok(Self {
            id,
            score,
            profile: ProfileSnapshot {
                name,
                match_criteria,
                photos: raw.photos,
                bio: raw.bio,
                extra: raw.extra,
            },
            preloaded: false,
        })
    }

    /// Display name from the profile snapshot
    pub fn name(&self) -> &str {
        &self.profile.name
    }

    /// First photo, used as the card's hero image.
    pub fn primary_photo(&self) -> Option<&str> {
        self.profile.photos.first().map(String::as_str)
    }
}
