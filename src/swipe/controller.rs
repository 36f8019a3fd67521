//! Optimistic swipe handling, rollback and undo.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::service::{SubmitError, SwipeService};
use crate::domain::{Candidate, MatchTask, SubmitResult, SwipeDirection, SwipeRecord, TaskError};
use crate::error::{FeedError, Result};
use crate::matches::MatchQueue;
use crate::network::NetworkMonitor;
use crate::pool::{CandidatePool, SharedState};
use crate::sinks::{AnalyticsEvent, AnalyticsSink};
use crate::sync::lock;

/// Configuration for the SwipeController.
#[derive(Debug, Clone)]
pub struct SwipeConfig {
    /// Deadline for one like submission
    pub submit_timeout: Duration,
}

impl Default for SwipeConfig {
    fn default() -> Self {
        Self {
            submit_timeout: Duration::from_secs(10),
        }
    }
}

/// Single-use handle that re-applies a rolled-back swipe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RollbackToken(u64);

/// A like whose submission failed
#[derive(Debug, Clone, PartialEq)]
pub struct SwipeFailure {
    pub candidate: Candidate,
    pub direction: SwipeDirection,
    pub error: SubmitError,
    /// Present when the swipe was rolled back; absent when the record was
    /// already gone (undone, or cleared by a reset)
    pub token: Option<RollbackToken>,
}

/// Result of an applied swipe
#[derive(Debug)]
pub struct SwipeTicket {
    pub record: SwipeRecord,
    /// Submission task of a like; resolves after rollback handling
    pub submission: Option<JoinHandle<()>>,
}

impl SwipeTicket {
    /// Wait for the submission, if any, to finish.
    pub async fn submitted(self) -> SwipeRecord {
        if let Some(handle) = self.submission {
            let _ = handle.await;
        }
        self.record
    }
}

struct RolledBack {
    record: SwipeRecord,
    epoch: u64,
}

struct ControllerInner {
    state: SharedState,
    pool: CandidatePool,
    service: Arc<dyn SwipeService>,
    matches: MatchQueue,
    analytics: Arc<dyn AnalyticsSink>,
    network: NetworkMonitor,
    config: SwipeConfig,
    failures: mpsc::UnboundedSender<SwipeFailure>,
    rollbacks: Mutex<HashMap<RollbackToken, RolledBack>>,
    shutdown: CancellationToken,
}

/// Applies swipes to the feed and submits likes.
///
/// Cloning yields another handle to the same controller.
#[derive(Clone)]
pub struct SwipeController {
    inner: Arc<ControllerInner>,
}

impl SwipeController {
    /// Create a controller. Failures are reported on the returned receiver.
    pub fn new(
        pool: CandidatePool,
        service: Arc<dyn SwipeService>,
        matches: MatchQueue,
        analytics: Arc<dyn AnalyticsSink>,
        network: NetworkMonitor,
        config: SwipeConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SwipeFailure>) {
        let (failures, rx) = mpsc::unbounded_channel();
        let controller = Self {
            inner: Arc::new(ControllerInner {
                state: pool.state(),
                pool,
                service,
                matches,
                analytics,
                network,
                config,
                failures,
                rollbacks: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        };
        (controller, rx)
    }

    /// Swipe the candidate at the cursor. Returns None when there is none.
    ///
    /// The cursor advances before any network result. A like is submitted in
    /// the background and its outcome handed to the match queue right away.
    pub fn swipe(&self, direction: SwipeDirection) -> Option<SwipeTicket> {
        // A new decision moves the feed on; outstanding rollbacks expire
        lock(&self.inner.rollbacks).clear();
        self.apply(direction)
    }

    /// Undo the most recent swipe. No-op on empty history.
    pub fn undo(&self) -> Option<SwipeRecord> {
        let record = lock(&self.inner.state).undo()?;
        tracing::info!(candidate_id = %record.candidate.id, seq = record.seq, "Swipe undone");
        self.inner.analytics.track(AnalyticsEvent::swipe_undo(&record));
        Some(record)
    }

    /// Re-apply a swipe that was rolled back after a failed submission.
    ///
    /// Rejected when the token was already used or the feed has moved on.
    pub fn undo_rollback(&self, token: RollbackToken) -> Result<SwipeTicket> {
        let rolled_back = lock(&self.inner.rollbacks)
            .remove(&token)
            .ok_or_else(|| FeedError::InvalidState("rollback token is unknown or already used".to_string()))?;

        {
            let state = lock(&self.inner.state);
            let current = state.current().map(|c| c.id.as_str());
            if state.epoch() != rolled_back.epoch || current != Some(rolled_back.record.candidate.id.as_str()) {
                return Err(FeedError::InvalidState("the feed has moved on since the rollback".to_string()));
            }
        }

        tracing::info!(candidate_id = %rolled_back.record.candidate.id, "Re-applying rolled back swipe");
        self.apply(rolled_back.record.direction)
            .ok_or_else(|| FeedError::InvalidState("no candidate to swipe".to_string()))
    }

    /// Abandon in-flight submissions.
    pub fn close(&self) {
        self.inner.shutdown.cancel();
        lock(&self.inner.rollbacks).clear();
    }

    fn apply(&self, direction: SwipeDirection) -> Option<SwipeTicket> {
        let (record, epoch) = {
            let mut state = lock(&self.inner.state);
            let record = state.advance(direction, Utc::now())?;
            (record, state.epoch())
        };

        tracing::info!(
            candidate_id = %record.candidate.id,
            direction = %direction,
            seq = record.seq,
            "Swiped"
        );
        self.inner.analytics.track(AnalyticsEvent::swipe(&record));
        self.inner.pool.maybe_top_up();

        let submission = direction.is_like().then(|| self.submit(record.clone(), epoch));
        Some(SwipeTicket { record, submission })
    }

    fn submit(&self, record: SwipeRecord, epoch: u64) -> JoinHandle<()> {
        let (tx, rx) = oneshot::channel::<std::result::Result<SubmitResult, TaskError>>();
        self.inner.matches.enqueue(MatchTask::new(record.candidate.clone(), async move {
            rx.await.unwrap_or(Err(TaskError::Abandoned))
        }));

        let controller = self.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = controller.inner.shutdown.cancelled() => {
                    tracing::debug!(candidate_id = %record.candidate.id, "Submission abandoned on close");
                    return;
                }
                result = controller.submit_once(&record) => result,
            };

            match result {
                Ok(outcome) => {
                    tracing::debug!(candidate_id = %record.candidate.id, is_match = outcome.is_match, "Swipe submitted");
                    let _ = tx.send(Ok(outcome));
                }
                Err(err) => {
                    let _ = tx.send(Err(TaskError::Submission(err.to_string())));
                    controller.roll_back(record, epoch, err);
                }
            }
        })
    }

    async fn submit_once(&self, record: &SwipeRecord) -> std::result::Result<SubmitResult, SubmitError> {
        if !self.inner.network.is_online() {
            return Err(SubmitError::Offline);
        }
        let submission = self.inner.service.submit(&record.candidate.id, record.direction);
        match tokio::time::timeout(self.inner.config.submit_timeout, submission).await {
            Ok(result) => result,
            Err(_) => Err(SubmitError::Timeout),
        }
    }

    fn roll_back(&self, record: SwipeRecord, epoch: u64, error: SubmitError) {
        let rolled_back = {
            let mut state = lock(&self.inner.state);
            state.epoch() == epoch && state.roll_back(record.seq)
        };

        let token = if rolled_back {
            let token = RollbackToken(record.seq);
            lock(&self.inner.rollbacks).insert(
                token,
                RolledBack {
                    record: record.clone(),
                    epoch,
                },
            );
            Some(token)
        } else {
            None
        };

        tracing::warn!(
            candidate_id = %record.candidate.id,
            error = %error,
            rolled_back,
            "Swipe submission failed"
        );
        let _ = self.inner.failures.send(SwipeFailure {
            candidate: record.candidate,
            direction: record.direction,
            error,
            token,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Filters, SubmitResult};
    use crate::matches::MatchQueueConfig;
    use crate::mock::{
        MockCandidateSource, MockSwipeService, RecordingAnalyticsSink, RecordingNotificationSink, candidate_page,
    };
    use crate::pool::{FeedState, FetchOptions, PoolConfig};
    use crate::retry::{RetryPolicy, RetryScheduler};

    struct Harness {
        controller: SwipeController,
        failures: mpsc::UnboundedReceiver<SwipeFailure>,
        pool: CandidatePool,
        service: Arc<MockSwipeService>,
        queue: MatchQueue,
        sink: Arc<RecordingNotificationSink>,
        analytics: Arc<RecordingAnalyticsSink>,
        network: NetworkMonitor,
    }

    async fn harness(count: usize) -> Harness {
        let source = Arc::new(MockCandidateSource::new());
        source.push_page(candidate_page("c", 0, count));
        let network = NetworkMonitor::default();
        let state = Arc::new(Mutex::new(FeedState::new(Filters::default())));
        let retry = Arc::new(RetryScheduler::new(RetryPolicy::default(), network.clone()));
        let pool = CandidatePool::new(state, source, network.clone(), retry, PoolConfig::default());
        pool.fetch(1, Filters::default(), FetchOptions::default()).await.unwrap();

        let sink = Arc::new(RecordingNotificationSink::new());
        let analytics = Arc::new(RecordingAnalyticsSink::new());
        let queue = MatchQueue::new(MatchQueueConfig::default(), sink.clone(), analytics.clone());
        let service = Arc::new(MockSwipeService::new());
        let (controller, failures) = SwipeController::new(
            pool.clone(),
            service.clone(),
            queue.clone(),
            analytics.clone(),
            network.clone(),
            SwipeConfig::default(),
        );
        Harness {
            controller,
            failures,
            pool,
            service,
            queue,
            sink,
            analytics,
            network,
        }
    }

    #[tokio::test]
    async fn test_swipes_advance_cursor() {
        let h = harness(10).await;
        for _ in 0..4 {
            assert!(h.controller.swipe(SwipeDirection::Pass).is_some());
        }
        let snapshot = h.pool.snapshot();
        assert_eq!(snapshot.cursor, 4);
        assert_eq!(snapshot.history.len(), 4);
        assert_eq!(h.analytics.names(), vec!["swipe"; 4]);
        assert!(h.service.submissions().is_empty(), "passes are not submitted");
    }

    #[tokio::test]
    async fn test_swipe_on_empty_pool_is_noop() {
        let h = harness(0).await;
        assert!(h.controller.swipe(SwipeDirection::Like).is_none());
        assert_eq!(h.pool.snapshot().cursor, 0);
        assert!(h.analytics.names().is_empty());
    }

    #[tokio::test]
    async fn test_undo_restores_previous_state() {
        let h = harness(10).await;
        h.controller.swipe(SwipeDirection::Pass);
        let before = h.pool.snapshot();

        h.controller.swipe(SwipeDirection::Pass);
        let undone = h.controller.undo().unwrap();

        let after = h.pool.snapshot();
        assert_eq!(undone.candidate.id, "c1");
        assert_eq!(after.cursor, before.cursor);
        assert_eq!(after.history, before.history);
        assert_eq!(h.analytics.names().last().map(String::as_str), Some("swipe_undo"));
    }

    #[tokio::test]
    async fn test_undo_on_empty_history_is_noop() {
        let h = harness(3).await;
        assert!(h.controller.undo().is_none());
        assert_eq!(h.pool.snapshot().cursor, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_b_like_produces_one_match() {
        let h = harness(10).await;
        h.service.respond("c0", Ok(SubmitResult::matched(92.0)));

        let ticket = h.controller.swipe(SwipeDirection::Like).unwrap();
        assert_eq!(h.pool.snapshot().cursor, 1, "cursor advances before the reply");
        ticket.submitted().await;
        h.queue.settle().await;

        let events = h.sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].score, 92.0);
        assert_eq!(events[0].matched_user.id, "c0");
        assert_eq!(h.service.submissions(), vec![("c0".to_string(), SwipeDirection::Like)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submission_timeout_rolls_back() {
        let mut h = harness(10).await;
        h.service.set_delay(Duration::from_secs(30));

        let ticket = h.controller.swipe(SwipeDirection::Like).unwrap();
        ticket.submitted().await;

        let snapshot = h.pool.snapshot();
        assert_eq!(snapshot.cursor, 0);
        assert!(snapshot.history.is_empty());

        let failure = h.failures.recv().await.unwrap();
        assert_eq!(failure.error, SubmitError::Timeout);
        assert_eq!(failure.candidate.id, "c0");
        assert!(failure.token.is_some());

        h.queue.settle().await;
        assert!(h.sink.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rollback_truncates_later_swipes() {
        let mut h = harness(10).await;
        h.service.respond("c0", Err(SubmitError::Rejected("nope".to_string())));
        h.service.set_delay(Duration::from_millis(500));

        let ticket = h.controller.swipe(SwipeDirection::Like).unwrap();
        h.controller.swipe(SwipeDirection::Pass);
        h.controller.swipe(SwipeDirection::Pass);
        assert_eq!(h.pool.snapshot().cursor, 3);

        ticket.submitted().await;
        let snapshot = h.pool.snapshot();
        assert_eq!(snapshot.cursor, 0);
        assert!(snapshot.history.is_empty());
        assert!(h.failures.recv().await.unwrap().token.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_undo_rollback_reapplies_and_resubmits() {
        let mut h = harness(10).await;
        h.service.respond("c0", Err(SubmitError::Disconnected));
        h.controller.swipe(SwipeDirection::Like).unwrap().submitted().await;
        let token = h.failures.recv().await.unwrap().token.unwrap();

        h.service.respond("c0", Ok(SubmitResult::matched(80.0)));
        let ticket = h.controller.undo_rollback(token).unwrap();
        assert_eq!(ticket.record.candidate.id, "c0");
        assert_eq!(h.pool.snapshot().cursor, 1);
        ticket.submitted().await;
        h.queue.settle().await;

        assert_eq!(h.service.submissions().len(), 2);
        assert_eq!(h.sink.events().len(), 1);

        // Single use
        assert!(matches!(h.controller.undo_rollback(token), Err(FeedError::InvalidState(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_undo_rollback_rejected_after_feed_moves_on() {
        let mut h = harness(10).await;
        h.service.respond("c0", Err(SubmitError::Disconnected));
        h.controller.swipe(SwipeDirection::Like).unwrap().submitted().await;
        let token = h.failures.recv().await.unwrap().token.unwrap();

        h.controller.swipe(SwipeDirection::Pass);

        assert!(h.controller.undo_rollback(token).is_err());
        assert_eq!(h.pool.snapshot().cursor, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_d_match_after_undo_is_still_surfaced() {
        let h = harness(10).await;
        h.service.respond("c0", Ok(SubmitResult::matched(75.0)));
        h.service.set_delay(Duration::from_secs(2));

        let ticket = h.controller.swipe(SwipeDirection::Like).unwrap();
        h.controller.undo();
        assert_eq!(h.pool.snapshot().cursor, 0);

        ticket.submitted().await;
        h.queue.settle().await;

        assert_eq!(h.sink.events().len(), 1);
        assert_eq!(h.pool.snapshot().cursor, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_after_undo_has_no_token() {
        let mut h = harness(10).await;
        h.service.respond("c0", Err(SubmitError::Timeout));
        h.service.set_delay(Duration::from_secs(1));

        let ticket = h.controller.swipe(SwipeDirection::Like).unwrap();
        h.controller.undo();
        h.controller.swipe(SwipeDirection::Pass);
        ticket.submitted().await;

        let failure = h.failures.recv().await.unwrap();
        assert!(failure.token.is_none());
        assert_eq!(h.pool.snapshot().cursor, 1, "the later swipe is untouched");
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_like_fails_fast() {
        let mut h = harness(10).await;
        h.network.set_online(false);

        h.controller.swipe(SwipeDirection::Like).unwrap().submitted().await;

        let failure = h.failures.recv().await.unwrap();
        assert_eq!(failure.error, SubmitError::Offline);
        assert!(h.service.submissions().is_empty());
        assert_eq!(h.pool.snapshot().cursor, 0);
    }

    #[tokio::test]
    async fn test_swipe_near_end_triggers_top_up() {
        let h = harness(10).await;
        for _ in 0..6 {
            h.controller.swipe(SwipeDirection::Pass);
        }
        assert!(!h.pool.is_topping_up());

        h.controller.swipe(SwipeDirection::Pass);
        h.pool.top_up_settled().await;

        let snapshot = h.pool.snapshot();
        assert_eq!(snapshot.fetch.page, 2);
        assert!(!snapshot.fetch.has_more, "the source ran dry");
    }
}
