//! Candidate filters, passed through to the fetch contract untouched.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Filters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personality_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget: Option<u32>,
    pub interests: BTreeSet<String>,
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_personality_type(mut self, personality_type: impl Into<String>) -> Self {
        self.personality_type = Some(personality_type.into());
        self
    }

    pub fn with_budget(mut self, budget: u32) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn with_interest(mut self, interest: impl Into<String>) -> Self {
        self.interests.insert(interest.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.personality_type.is_none() && self.budget.is_none() && self.interests.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filters_equality_ignores_interest_order() {
        let a = Filters::new().with_interest("hiking").with_interest("chess");
        let b = Filters::new().with_interest("chess").with_interest("hiking");
        assert_eq!(a, b);
        assert!(!a.is_empty());
        assert!(Filters::default().is_empty());
    }

    #[test]
    fn test_filters_serialization() {
        let filters = Filters::new().with_personality_type("INTJ").with_budget(1200);
        let json = serde_json::to_value(&filters).unwrap();
        assert_eq!(json["personalityType"], "INTJ");
        assert_eq!(json["budget"], 1200);
    }
}
