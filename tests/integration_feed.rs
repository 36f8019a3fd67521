//! Feed engine integration tests
//!
//! Drives `MatchFeed` end to end against the crate's mocks: pagination,
//! optimistic swipes, retry exhaustion, connectivity and match delivery.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use matchfeed::config::Config;
use matchfeed::domain::{SubmitResult, SwipeDirection};
use matchfeed::mock::{
    MockCandidateSource, MockImageFetcher, MockPushChannel, MockSwipeService, RecordingAnalyticsSink,
    RecordingNotificationSink, candidate_json, candidate_page,
};
use matchfeed::network::NetworkMonitor;
use matchfeed::pool::{FetchError, FetchStatus};
use matchfeed::retry::RetryPolicy;
use matchfeed::swipe::{PushSwipeService, SwipeService};
use matchfeed::{FeedConfig, FeedDeps, FeedError, MatchFeed};
use serde_json::json;
use tempfile::NamedTempFile;

struct World {
    feed: MatchFeed,
    source: Arc<MockCandidateSource>,
    swipes: Arc<MockSwipeService>,
    sink: Arc<RecordingNotificationSink>,
    analytics: Arc<RecordingAnalyticsSink>,
}

fn world_with(config: FeedConfig, swipes: Arc<dyn SwipeService>, mock_swipes: Arc<MockSwipeService>) -> World {
    let source = Arc::new(MockCandidateSource::new());
    let sink = Arc::new(RecordingNotificationSink::new());
    let analytics = Arc::new(RecordingAnalyticsSink::new());
    let deps = FeedDeps {
        source: source.clone(),
        swipes,
        notifications: sink.clone(),
        analytics: analytics.clone(),
        images: Arc::new(MockImageFetcher::new()),
    };
    World {
        feed: MatchFeed::new(deps, config, NetworkMonitor::default()),
        source,
        swipes: mock_swipes,
        sink,
        analytics,
    }
}

fn world() -> World {
    let swipes = Arc::new(MockSwipeService::new());
    world_with(FeedConfig::default(), swipes.clone(), swipes)
}

/// Scenario A: malformed items are dropped and a short page ends pagination
#[tokio::test]
async fn test_malformed_items_dropped_and_short_page_exhausts() {
    let mut config = FeedConfig::default();
    config.pool.batch_size = 5;
    let swipes = Arc::new(MockSwipeService::new());
    let w = world_with(config, swipes.clone(), swipes);

    let mut items = candidate_page("c", 0, 8);
    items.push(json!({"id": "no-name", "matchCriteria": {}}));
    items.push(json!({"id": "no-criteria", "name": "Bo"}));
    w.source.push_page(items);

    let outcome = w.feed.start().await.unwrap();

    assert_eq!(w.source.requests()[0].limit, 10);
    assert_eq!(outcome.accepted.len(), 8);
    assert!(!outcome.has_more);
    assert_eq!(w.feed.snapshot().candidates.len(), 8);
}

/// Scenario B: a like that matches yields exactly one event
#[tokio::test(start_paused = true)]
async fn test_like_with_match_yields_one_event() {
    let w = world();
    w.source.push_page(candidate_page("x", 0, 20));
    w.feed.start().await.unwrap();
    w.swipes.respond("x0", Ok(SubmitResult::matched(92.0)));

    let ticket = w.feed.like().unwrap();
    let snapshot = w.feed.snapshot();
    assert_eq!(snapshot.cursor, 1);
    assert_eq!(snapshot.history.len(), 1);
    assert_eq!(snapshot.history[0].direction, SwipeDirection::Like);

    ticket.submitted().await;
    w.feed.settle().await;

    let events = w.sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].score, 92.0);
    assert!(w.analytics.names().contains(&"match_created".to_string()));
}

/// Scenario C: automatic retries exhaust, then only a manual retry fetches
#[tokio::test(start_paused = true)]
async fn test_retries_exhaust_then_manual_retry_recovers() {
    let w = world();
    for _ in 0..4 {
        w.source.push_error(FetchError::ServerError {
            status: 503,
            message: "unavailable".to_string(),
        });
    }

    let err = w.feed.start().await.unwrap_err();

    assert!(matches!(err, FeedError::Fetch(FetchError::ServerError { status: 503, .. })));
    assert!(err.is_recoverable());
    assert_eq!(w.feed.status(), FetchStatus::Error);
    assert_eq!(w.feed.snapshot().fetch.retry_count, 3);
    assert_eq!(w.source.requests().len(), 4);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(w.source.requests().len(), 4);

    w.source.push_page(candidate_page("c", 0, 20));
    w.feed.retry().await.unwrap();
    assert_eq!(w.feed.status(), FetchStatus::Idle);
    assert_eq!(w.feed.snapshot().fetch.retry_count, 0);
    assert_eq!(w.feed.snapshot().candidates.len(), 20);
}

/// Scenario D: undo before the submission resolves still surfaces the match
#[tokio::test(start_paused = true)]
async fn test_match_after_undo_is_still_delivered() {
    let w = world();
    w.source.push_page(candidate_page("x", 0, 20));
    w.feed.start().await.unwrap();
    w.swipes.respond("x0", Ok(SubmitResult::matched(81.0)));
    w.swipes.set_delay(Duration::from_secs(3));

    let ticket = w.feed.like().unwrap();
    let undone = w.feed.undo().unwrap();
    assert_eq!(undone.candidate.id, "x0");

    ticket.submitted().await;
    w.feed.settle().await;

    assert_eq!(w.sink.events().len(), 1);
    let snapshot = w.feed.snapshot();
    assert_eq!(snapshot.cursor, 0);
    assert!(snapshot.history.is_empty());
}

#[tokio::test]
async fn test_n_swipes_advance_cursor_by_n() {
    let w = world();
    w.source.push_page(candidate_page("c", 0, 20));
    w.feed.start().await.unwrap();

    for i in 0..12 {
        let direction = if i % 3 == 0 { SwipeDirection::Like } else { SwipeDirection::Pass };
        w.feed.swipe(direction).unwrap();
    }

    let snapshot = w.feed.snapshot();
    assert_eq!(snapshot.cursor, 12);
    assert_eq!(snapshot.history.len(), 12);
}

#[tokio::test]
async fn test_undo_immediately_after_swipe_restores_state() {
    let w = world();
    w.source.push_page(candidate_page("c", 0, 20));
    w.feed.start().await.unwrap();
    w.feed.pass();
    let before = w.feed.snapshot();

    w.feed.pass();
    w.feed.undo();

    let after = w.feed.snapshot();
    assert_eq!(after.cursor, before.cursor);
    assert_eq!(after.history, before.history);
}

#[tokio::test]
async fn test_overlapping_pages_keep_each_id_once() {
    let w = world();
    w.source.push_page(candidate_page("c", 0, 20));
    w.source.push_page(candidate_page("c", 15, 10));
    w.feed.start().await.unwrap();

    let outcome = w.feed.load_more().await.unwrap();
    assert_eq!(outcome.accepted.len(), 5);
    assert!(!outcome.has_more, "five new items do not fill a page of ten");

    let snapshot = w.feed.snapshot();
    let mut ids: Vec<String> = snapshot.candidates.iter().map(|c| c.id.clone()).collect();
    assert_eq!(ids.len(), 25);
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 25);
}

#[test]
fn test_backoff_delay_bounds() {
    let policy = RetryPolicy::default();
    for retry_count in 0..3u32 {
        let base = Duration::from_millis(1000 * 2u64.pow(retry_count));
        for _ in 0..50 {
            let delay = policy.delay_for(retry_count);
            assert!(delay >= base.min(Duration::from_millis(10_000)));
            assert!(delay <= (base + Duration::from_millis(1000)).min(Duration::from_millis(10_000)));
        }
    }
    assert_eq!(policy.delay_for(6), Duration::from_millis(10_000));
}

#[tokio::test(start_paused = true)]
async fn test_simultaneous_matches_delivered_in_score_order_and_staggered() {
    let w = world();
    w.source.push_page(candidate_page("m", 0, 20));
    w.feed.start().await.unwrap();
    w.swipes.set_delay(Duration::from_secs(1));
    for (id, score) in [("m0", 70.0), ("m1", 95.0), ("m2", 80.0), ("m3", 60.0), ("m4", 65.0)] {
        w.swipes.respond(id, Ok(SubmitResult::matched(score)));
    }

    let tickets: Vec<_> = (0..5).map(|_| w.feed.like().unwrap()).collect();
    for ticket in tickets {
        ticket.submitted().await;
    }
    w.feed.settle().await;

    let scores: Vec<f64> = w.sink.events().iter().map(|e| e.score).collect();
    assert_eq!(scores, vec![95.0, 80.0, 70.0, 65.0, 60.0]);
    let times = w.sink.delivery_times();
    for pair in times.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(800));
    }
}

#[tokio::test]
async fn test_offline_fetches_need_fresh_fetch_after_reconnect() {
    let w = world();
    w.feed.set_online(false);

    for _ in 0..3 {
        let err = w.feed.load_more().await.unwrap_err();
        assert!(matches!(err, FeedError::Fetch(FetchError::Offline)));
    }
    assert_eq!(w.feed.snapshot().fetch.retry_count, 0);
    assert!(w.source.requests().is_empty());

    w.feed.set_online(true);
    let snapshot = w.feed.snapshot();
    assert!(snapshot.last_error().is_none());
    assert_eq!(snapshot.fetch.status, FetchStatus::Error);

    w.source.push_page(candidate_page("c", 0, 20));
    w.feed.start().await.unwrap();
    assert_eq!(w.feed.status(), FetchStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_failed_like_rolls_back_and_token_reapplies() {
    let w = world();
    w.source.push_page(candidate_page("c", 0, 20));
    w.feed.start().await.unwrap();
    w.swipes.set_delay(Duration::from_secs(11));

    w.feed.like().unwrap().submitted().await;
    let failure = w.feed.next_failure().await.unwrap();
    assert_eq!(w.feed.snapshot().cursor, 0);

    w.swipes.set_delay(Duration::ZERO);
    let ticket = w.feed.undo_rollback(failure.token.unwrap()).unwrap();
    ticket.submitted().await;
    assert_eq!(w.feed.snapshot().cursor, 1);
    assert!(w.feed.take_failures().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_push_channel_service_end_to_end() {
    let channel = Arc::new(MockPushChannel::new());
    channel.auto_reply(|request| {
        let matched = request["candidateId"] == "p1";
        Some(json!({"requestId": request["requestId"], "isMatch": matched, "score": 77.0}))
    });
    let service: Arc<dyn SwipeService> = Arc::new(PushSwipeService::new(channel.clone()));
    let w = world_with(FeedConfig::default(), service, Arc::new(MockSwipeService::new()));
    w.source.push_page(vec![candidate_json("p0", 90.0), candidate_json("p1", 80.0)]);
    w.feed.start().await.unwrap();

    w.feed.like().unwrap().submitted().await;
    w.feed.like().unwrap().submitted().await;
    w.feed.settle().await;

    let events = w.sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].matched_user.id, "p1");
    assert_eq!(channel.emitted().len(), 2);
}

#[tokio::test]
async fn test_engine_built_from_config_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "pool:\n  batch_size: 4\n  preload_threshold: 1\n").unwrap();
    let config = Config::load(Some(&file.path().to_path_buf())).unwrap();

    let swipes = Arc::new(MockSwipeService::new());
    let w = world_with(config.feed_config(), swipes.clone(), swipes);
    w.source.push_page(candidate_page("c", 0, 8));
    w.feed.start().await.unwrap();

    assert_eq!(w.source.requests()[0].limit, 8);
    assert!(w.feed.snapshot().fetch.has_more);
}
