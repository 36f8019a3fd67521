//! Outbound sinks: match notifications and analytics.
//!
//! Both are fire-and-forget. Implementations must return quickly and never
//! block the engine; a sink that needs I/O should hand the event to its own
//! task or channel.

use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::domain::{MatchEvent, SwipeRecord};
use crate::id::{generate_event_id, now_ms};

/// Analytics event names
pub mod event_names {
    pub const SWIPE: &str = "swipe";
    pub const SWIPE_UNDO: &str = "swipe_undo";
    pub const MATCH_CREATED: &str = "match_created";
}

/// Receives confirmed matches, one at a time
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, event: MatchEvent);
}

/// Receives discrete analytics events, best-effort
pub trait AnalyticsSink: Send + Sync {
    fn track(&self, event: AnalyticsEvent);
}

/// A discrete analytics event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsEvent {
    pub id: String,
    pub name: String,
    pub properties: Map<String, Value>,
    pub timestamp_ms: u64,
}

impl AnalyticsEvent {
    pub fn new(name: &str, properties: Value) -> Self {
        let properties = match properties {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Self {
            id: generate_event_id(),
            name: name.to_string(),
            properties,
            timestamp_ms: now_ms(),
        }
    }

    pub fn swipe(record: &SwipeRecord) -> Self {
        Self::new(
            event_names::SWIPE,
            json!({
                "candidateId": record.candidate.id,
                "direction": record.direction,
                "score": record.candidate.score,
            }),
        )
    }

    pub fn swipe_undo(record: &SwipeRecord) -> Self {
        Self::new(
            event_names::SWIPE_UNDO,
            json!({
                "candidateId": record.candidate.id,
                "direction": record.direction,
            }),
        )
    }

    pub fn match_created(event: &MatchEvent) -> Self {
        Self::new(
            event_names::MATCH_CREATED,
            json!({
                "candidateId": event.matched_user.id,
                "score": event.score,
                "conversationId": event.conversation.as_ref().map(|c| c.id.clone()),
            }),
        )
    }
}

/// Analytics sink that writes events to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAnalyticsSink;

impl AnalyticsSink for LogAnalyticsSink {
    fn track(&self, event: AnalyticsEvent) {
        let properties = Value::Object(event.properties);
        tracing::info!(name = %event.name, properties = %properties, "analytics");
    }
}

/// Notification sink that writes matches to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotificationSink;

impl NotificationSink for LogNotificationSink {
    fn deliver(&self, event: MatchEvent) {
        tracing::info!(
            candidate_id = %event.matched_user.id,
            score = event.score,
            "It's a match"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Candidate, SubmitResult, SwipeDirection};
    use chrono::Utc;

    #[test]
    fn test_swipe_event_properties() {
        let record = SwipeRecord {
            seq: 1,
            candidate: Candidate::new("c1", "Ada", 75.0),
            direction: SwipeDirection::Like,
            at: Utc::now(),
        };
        let event = AnalyticsEvent::swipe(&record);
        assert_eq!(event.name, "swipe");
        assert_eq!(event.properties["candidateId"], "c1");
        assert_eq!(event.properties["direction"], "like");
        assert!(event.id.starts_with("evt-"));
    }

    #[test]
    fn test_match_created_event() {
        let event = MatchEvent::from_outcome(
            Candidate::new("c9", "Bo", 10.0),
            SubmitResult::matched(92.0).with_conversation("conv-7"),
        );
        let analytics = AnalyticsEvent::match_created(&event);
        assert_eq!(analytics.name, event_names::MATCH_CREATED);
        assert_eq!(analytics.properties["score"], 92.0);
        assert_eq!(analytics.properties["conversationId"], "conv-7");
    }

    #[test]
    fn test_non_object_properties_are_wrapped() {
        let event = AnalyticsEvent::new("custom", json!(5));
        assert_eq!(event.properties["value"], 5);
        let event = AnalyticsEvent::new("custom", Value::Null);
        assert!(event.properties.is_empty());
    }

    #[test]
    fn test_log_sinks_accept_events() {
        let event = MatchEvent::from_outcome(Candidate::new("c1", "Ada", 80.0), SubmitResult::matched(80.0));
        LogAnalyticsSink.track(AnalyticsEvent::match_created(&event));
        LogAnalyticsSink.track(AnalyticsEvent::new("custom", json!({"k": "v"})));
        LogNotificationSink.deliver(event);
    }
}
