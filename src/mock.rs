//! Scriptable test doubles for every injected capability.
//!
//! Used by the unit tests and the integration tests; also handy for hosts
//! that want to exercise a UI against a canned feed.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::time::Instant;

use crate::domain::{MatchEvent, SubmitResult, SwipeDirection};
use crate::pool::{CandidateSource, FetchError, FetchRequest, FetchResponse};
use crate::preload::{ImageError, ImageFetcher};
use crate::sinks::{AnalyticsEvent, AnalyticsSink, NotificationSink};
use crate::swipe::{EventHandler, PushChannel, SWIPE_RESULT_EVENT, SubmitError, SubscriptionId, SwipeService};
use crate::sync::lock;

/// Well-formed candidate item as served by the fetch contract
pub fn candidate_json(id: &str, score: f64) -> Value {
    json!({
        "id": id,
        "name": format!("User {}", id),
        "matchCriteria": {},
        "score": score,
        "photos": [format!("https://images.example.com/{}.jpg", id)],
    })
}

/// `count` candidates `{prefix}{start}..`, highest score first
pub fn candidate_page(prefix: &str, start: usize, count: usize) -> Vec<Value> {
    (start..start + count)
        .map(|i| candidate_json(&format!("{}{}", prefix, i), 1000.0 - i as f64))
        .collect()
}

struct ScriptedFetch {
    result: Result<FetchResponse, FetchError>,
    delay: Option<Duration>,
}

/// Candidate source that replays scripted responses in order.
///
/// Once the script runs out every fetch returns an empty page.
#[derive(Default)]
pub struct MockCandidateSource {
    script: Mutex<VecDeque<ScriptedFetch>>,
    requests: Mutex<Vec<FetchRequest>>,
}

impl MockCandidateSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_page(&self, items: Vec<Value>) {
        self.push(Ok(FetchResponse::new(items)), None);
    }

    /// A page that arrives after `delay`
    pub fn push_delayed_page(&self, items: Vec<Value>, delay: Duration) {
        self.push(Ok(FetchResponse::new(items)), Some(delay));
    }

    pub fn push_error(&self, error: FetchError) {
        self.push(Err(error), None);
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<FetchRequest> {
        lock(&self.requests).clone()
    }

    fn push(&self, result: Result<FetchResponse, FetchError>, delay: Option<Duration>) {
        lock(&self.script).push_back(ScriptedFetch { result, delay });
    }
}

#[async_trait]
impl CandidateSource for MockCandidateSource {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        lock(&self.requests).push(request);
        let next = lock(&self.script).pop_front();
        let Some(scripted) = next else {
            return Ok(FetchResponse::default());
        };
        if let Some(delay) = scripted.delay {
            tokio::time::sleep(delay).await;
        }
        scripted.result
    }
}

/// Swipe service with per-candidate replies.
///
/// Candidates without a scripted reply get "no match".
#[derive(Default)]
pub struct MockSwipeService {
    replies: Mutex<HashMap<String, Result<SubmitResult, SubmitError>>>,
    delay: Mutex<Option<Duration>>,
    submissions: Mutex<Vec<(String, SwipeDirection)>>,
}

impl MockSwipeService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the reply for `candidate_id`
    pub fn respond(&self, candidate_id: &str, reply: Result<SubmitResult, SubmitError>) {
        lock(&self.replies).insert(candidate_id.to_string(), reply);
    }

    /// Delay every reply
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = Some(delay);
    }

    pub fn submissions(&self) -> Vec<(String, SwipeDirection)> {
        lock(&self.submissions).clone()
    }
}

#[async_trait]
impl SwipeService for MockSwipeService {
    async fn submit(&self, candidate_id: &str, direction: SwipeDirection) -> Result<SubmitResult, SubmitError> {
        lock(&self.submissions).push((candidate_id.to_string(), direction));
        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let reply = lock(&self.replies).get(candidate_id).cloned();
        reply.unwrap_or_else(|| Ok(SubmitResult::no_match()))
    }
}

type AutoReply = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

/// In-memory push channel.
///
/// Records emitted events; an optional auto-reply answers each emit with a
/// `swipe_result` delivered synchronously to the subscribers.
#[derive(Default)]
pub struct MockPushChannel {
    connected: AtomicBool,
    connects: AtomicUsize,
    fail_emits: AtomicBool,
    next_subscription: AtomicU64,
    handlers: Mutex<HashMap<String, Vec<(SubscriptionId, EventHandler)>>>,
    emitted: Mutex<Vec<(String, Value)>>,
    auto_reply: Mutex<Option<AutoReply>>,
}

impl MockPushChannel {
    /// A connected channel
    pub fn new() -> Self {
        let channel = Self::default();
        channel.connected.store(true, Ordering::SeqCst);
        channel
    }

    pub fn disconnected() -> Self {
        Self::default()
    }

    /// Answer every emit with `reply(payload)`
    pub fn auto_reply<F>(&self, reply: F)
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        *lock(&self.auto_reply) = Some(Arc::new(reply));
    }

    pub fn fail_emits(&self, fail: bool) {
        self.fail_emits.store(fail, Ordering::SeqCst);
    }

    /// Push an inbound event to the subscribers.
    pub fn deliver(&self, event: &str, payload: Value) {
        let handlers: Vec<EventHandler> = lock(&self.handlers)
            .get(event)
            .map(|subs| subs.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();
        for handler in handlers {
            handler(payload.clone());
        }
    }

    pub fn emitted(&self) -> Vec<(String, Value)> {
        lock(&self.emitted).clone()
    }

    pub fn handler_count(&self, event: &str) -> usize {
        lock(&self.handlers).get(event).map_or(0, Vec::len)
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushChannel for MockPushChannel {
    async fn connect(&self) -> Result<(), SubmitError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn on(&self, event: &str, handler: EventHandler) -> SubscriptionId {
        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        lock(&self.handlers).entry(event.to_string()).or_default().push((id, handler));
        id
    }

    fn off(&self, event: &str, subscription: SubscriptionId) {
        if let Some(subs) = lock(&self.handlers).get_mut(event) {
            subs.retain(|(id, _)| *id != subscription);
        }
    }

    fn emit(&self, event: &str, payload: Value) -> Result<(), SubmitError> {
        if self.fail_emits.load(Ordering::SeqCst) || !self.is_connected() {
            return Err(SubmitError::Disconnected);
        }
        lock(&self.emitted).push((event.to_string(), payload.clone()));

        let reply = lock(&self.auto_reply).clone();
        if let Some(reply) = reply.and_then(|r| r(&payload)) {
            self.deliver(SWIPE_RESULT_EVENT, reply);
        }
        Ok(())
    }
}

/// Notification sink that records deliveries with their time
#[derive(Default)]
pub struct RecordingNotificationSink {
    deliveries: Mutex<Vec<(Instant, MatchEvent)>>,
}

impl RecordingNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MatchEvent> {
        lock(&self.deliveries).iter().map(|(_, e)| e.clone()).collect()
    }

    pub fn delivery_times(&self) -> Vec<Instant> {
        lock(&self.deliveries).iter().map(|(t, _)| *t).collect()
    }
}

impl NotificationSink for RecordingNotificationSink {
    fn deliver(&self, event: MatchEvent) {
        lock(&self.deliveries).push((Instant::now(), event));
    }
}

/// Analytics sink that records every event
#[derive(Default)]
pub struct RecordingAnalyticsSink {
    events: Mutex<Vec<AnalyticsEvent>>,
}

impl RecordingAnalyticsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AnalyticsEvent> {
        lock(&self.events).clone()
    }

    pub fn names(&self) -> Vec<String> {
        lock(&self.events).iter().map(|e| e.name.clone()).collect()
    }
}

impl AnalyticsSink for RecordingAnalyticsSink {
    fn track(&self, event: AnalyticsEvent) {
        lock(&self.events).push(event);
    }
}

/// Image fetcher that succeeds instantly unless a URL is marked failing
#[derive(Default)]
pub struct MockImageFetcher {
    loaded: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
}

impl MockImageFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_url(&self, url: &str) {
        lock(&self.failing).insert(url.to_string());
    }

    /// URLs requested so far, in call order
    pub fn loaded(&self) -> Vec<String> {
        lock(&self.loaded).clone()
    }
}

#[async_trait]
impl ImageFetcher for MockImageFetcher {
    async fn load(&self, url: &str) -> Result<(), ImageError> {
        lock(&self.loaded).push(url.to_string());
        if lock(&self.failing).contains(url) {
            return Err(ImageError::LoadFailed {
                url: url.to_string(),
                reason: "scripted failure".to_string(),
            });
        }
        Ok(())
    }
}
