//! Swipe submission contract and the push-channel adapter.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::oneshot;

use crate::domain::{SubmitResult, SwipeDirection};
use crate::id::generate_request_id;
use crate::sync::lock;

/// Push channel event carrying an outgoing swipe
pub const SWIPE_EVENT: &str = "swipe";

/// Push channel event carrying the reply to a swipe
pub const SWIPE_RESULT_EVENT: &str = "swipe_result";

/// Errors that can occur while submitting a swipe
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("Swipe submission timed out")]
    Timeout,

    #[error("No network connection")]
    Offline,

    #[error("Push channel disconnected")]
    Disconnected,

    #[error("Swipe rejected: {0}")]
    Rejected(String),

    #[error("Invalid swipe reply: {0}")]
    InvalidReply(String),
}

/// Remote service that records swipes and may report a mutual match
#[async_trait]
pub trait SwipeService: Send + Sync {
    async fn submit(&self, candidate_id: &str, direction: SwipeDirection) -> Result<SubmitResult, SubmitError>;
}

/// Handler invoked with each payload of a subscribed event
pub type EventHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Identifies one `on` registration
pub type SubscriptionId = u64;

/// Bidirectional event channel to the backend. The transport is supplied by
/// the host.
#[async_trait]
pub trait PushChannel: Send + Sync {
    async fn connect(&self) -> Result<(), SubmitError>;

    fn disconnect(&self);

    fn is_connected(&self) -> bool;

    fn on(&self, event: &str, handler: EventHandler) -> SubscriptionId;

    fn off(&self, event: &str, subscription: SubscriptionId);

    fn emit(&self, event: &str, payload: Value) -> Result<(), SubmitError>;
}

type PendingReplies = Arc<Mutex<HashMap<String, oneshot::Sender<Value>>>>;

/// `SwipeService` over a `PushChannel`.
///
/// Each submission is emitted as a `swipe` event tagged with a fresh
/// `requestId`; the matching `swipe_result` reply resolves it. Replies for
/// unknown or abandoned request ids are dropped.
pub struct PushSwipeService<C: PushChannel> {
    channel: Arc<C>,
    pending: PendingReplies,
    subscription: SubscriptionId,
}

impl<C: PushChannel> PushSwipeService<C> {
    pub fn new(channel: Arc<C>) -> Self {
        let pending: PendingReplies = Arc::new(Mutex::new(HashMap::new()));
        let routes = pending.clone();
        let subscription = channel.on(
            SWIPE_RESULT_EVENT,
            Arc::new(move |payload: Value| {
                let Some(request_id) = payload.get("requestId").and_then(Value::as_str) else {
                    tracing::warn!("Dropping swipe_result without requestId");
                    return;
                };
                let sender = lock(&routes).remove(request_id);
                match sender {
                    Some(sender) => {
                        let _ = sender.send(payload);
                    }
                    None => tracing::debug!(request_id, "Dropping reply for unknown request"),
                }
            }),
        );
        Self {
            channel,
            pending,
            subscription,
        }
    }

    /// Requests awaiting a reply
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    fn parse_reply(payload: Value) -> Result<SubmitResult, SubmitError> {
        if let Some(error) = payload.get("error") {
            let message = error.as_str().map(String::from).unwrap_or_else(|| error.to_string());
            return Err(SubmitError::Rejected(message));
        }
        serde_json::from_value(payload).map_err(|e| SubmitError::InvalidReply(e.to_string()))
    }
}

/// Removes the pending entry when a submission is dropped before its reply.
struct PendingGuard<'a> {
    pending: &'a PendingReplies,
    request_id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(&self.request_id);
    }
}

#[async_trait]
impl<C: PushChannel + 'static> SwipeService for PushSwipeService<C> {
    async fn submit(&self, candidate_id: &str, direction: SwipeDirection) -> Result<SubmitResult, SubmitError> {
        if !self.channel.is_connected() {
            self.channel.connect().await?;
        }

        let request_id = generate_request_id();
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(request_id.clone(), tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            request_id: request_id.clone(),
        };

        self.channel.emit(
            SWIPE_EVENT,
            json!({
                "requestId": request_id,
                "candidateId": candidate_id,
                "direction": direction,
            }),
        )?;
        tracing::debug!(request_id = %request_id, candidate_id, "Swipe emitted");

        let payload = rx.await.map_err(|_| SubmitError::Disconnected)?;
        Self::parse_reply(payload)
    }
}

impl<C: PushChannel> Drop for PushSwipeService<C> {
    fn drop(&mut self) {
        self.channel.off(SWIPE_RESULT_EVENT, self.subscription);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPushChannel;

    #[tokio::test]
    async fn test_reply_is_correlated_by_request_id() {
        let channel = Arc::new(MockPushChannel::new());
        channel.auto_reply(|request| {
            Some(json!({
                "requestId": request["requestId"],
                "isMatch": request["candidateId"] == "c1",
                "score": 92.0,
            }))
        });
        let service = PushSwipeService::new(channel.clone());

        let result = service.submit("c1", SwipeDirection::Like).await.unwrap();
        assert!(result.is_match);
        assert_eq!(result.score, Some(92.0));

        let result = service.submit("c2", SwipeDirection::Like).await.unwrap();
        assert!(!result.is_match);

        let emitted = channel.emitted();
        assert_eq!(emitted.len(), 2);
        assert_eq!(emitted[0].0, SWIPE_EVENT);
        assert_eq!(emitted[0].1["direction"], "like");
        assert_eq!(service.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_connects_lazily() {
        let channel = Arc::new(MockPushChannel::disconnected());
        channel.auto_reply(|request| Some(json!({"requestId": request["requestId"]})));
        let service = PushSwipeService::new(channel.clone());

        service.submit("c1", SwipeDirection::Like).await.unwrap();
        assert!(channel.is_connected());
        assert_eq!(channel.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_error_reply_is_rejection() {
        let channel = Arc::new(MockPushChannel::new());
        channel.auto_reply(|request| Some(json!({"requestId": request["requestId"], "error": "quota exceeded"})));
        let service = PushSwipeService::new(channel);

        let result = service.submit("c1", SwipeDirection::Like).await;
        assert_eq!(result, Err(SubmitError::Rejected("quota exceeded".to_string())));
    }

    #[tokio::test]
    async fn test_emit_failure_clears_pending() {
        let channel = Arc::new(MockPushChannel::new());
        channel.fail_emits(true);
        let service = PushSwipeService::new(channel);

        let result = service.submit("c1", SwipeDirection::Like).await;
        assert_eq!(result, Err(SubmitError::Disconnected));
        assert_eq!(service.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_submission_drops_late_reply() {
        let channel = Arc::new(MockPushChannel::new());
        let service = PushSwipeService::new(channel.clone());

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            service.submit("c1", SwipeDirection::Like),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(service.pending_count(), 0);

        let request_id = channel.emitted()[0].1["requestId"].clone();
        channel.deliver(SWIPE_RESULT_EVENT, json!({"requestId": request_id, "isMatch": true}));
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let channel = Arc::new(MockPushChannel::new());
        let service = PushSwipeService::new(channel.clone());
        assert_eq!(channel.handler_count(SWIPE_RESULT_EVENT), 1);
        drop(service);
        assert_eq!(channel.handler_count(SWIPE_RESULT_EVENT), 0);
    }
}
