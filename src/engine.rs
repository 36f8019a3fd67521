//! MatchFeed: the engine facade a UI talks to.
//!
//! Owns the feed state and every component, wires them together and exposes
//! one method per user intent. All operations are cheap to call from a UI
//! thread; async ones only await network and timers, never a lock.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::domain::{Candidate, Filters, SwipeDirection, SwipeRecord};
use crate::error::Result;
use crate::gesture::{GestureConfig, PullToRefresh};
use crate::matches::{MatchQueue, MatchQueueConfig};
use crate::network::{NetworkEvent, NetworkMonitor};
use crate::pool::{
    CandidatePool, CandidateSource, FeedSnapshot, FeedState, FetchOptions, FetchOutcome, FetchStatus, PoolConfig,
    SharedState,
};
use crate::preload::{ImageFetcher, ImagePreloader, PreloadConfig};
use crate::registry::ResourceRegistry;
use crate::retry::{RetryPolicy, RetryScheduler};
use crate::sinks::{AnalyticsSink, NotificationSink};
use crate::swipe::{RollbackToken, SwipeConfig, SwipeController, SwipeFailure, SwipeService, SwipeTicket};
use crate::sync::lock;

/// Opaque UI resource attached to a candidate
pub type ResourceHandle = Box<dyn Any + Send>;

/// Capabilities the host injects
#[derive(Clone)]
pub struct FeedDeps {
    pub source: Arc<dyn CandidateSource>,
    pub swipes: Arc<dyn SwipeService>,
    pub notifications: Arc<dyn NotificationSink>,
    pub analytics: Arc<dyn AnalyticsSink>,
    pub images: Arc<dyn ImageFetcher>,
}

/// Runtime configuration of every component
#[derive(Debug, Clone, Default)]
pub struct FeedConfig {
    pub pool: PoolConfig,
    pub retry: RetryPolicy,
    pub swipe: SwipeConfig,
    pub matches: MatchQueueConfig,
    pub preload: PreloadConfig,
    pub gesture: GestureConfig,
}

/// The swipe-and-match engine.
pub struct MatchFeed {
    state: SharedState,
    network: NetworkMonitor,
    pool: CandidatePool,
    controller: SwipeController,
    matches: MatchQueue,
    preloader: ImagePreloader,
    gesture: Mutex<PullToRefresh>,
    resources: Mutex<ResourceRegistry<ResourceHandle>>,
    failures: tokio::sync::Mutex<mpsc::UnboundedReceiver<SwipeFailure>>,
    seen_epoch: AtomicU64,
    preload_window: usize,
    closed: AtomicBool,
}

impl MatchFeed {
    pub fn new(deps: FeedDeps, config: FeedConfig, network: NetworkMonitor) -> Self {
        Self::with_filters(deps, config, network, Filters::default())
    }

    pub fn with_filters(deps: FeedDeps, config: FeedConfig, network: NetworkMonitor, filters: Filters) -> Self {
        let state: SharedState = Arc::new(Mutex::new(FeedState::new(filters)));
        let retry = Arc::new(RetryScheduler::new(config.retry.clone(), network.clone()));
        let preload_window = config.pool.batch_size.max(config.preload.priority_count);
        let pool = CandidatePool::new(state.clone(), deps.source, network.clone(), retry, config.pool);

        let matches = MatchQueue::new(config.matches, deps.notifications, deps.analytics.clone());
        let (controller, failures) = SwipeController::new(
            pool.clone(),
            deps.swipes,
            matches.clone(),
            deps.analytics,
            network.clone(),
            config.swipe,
        );

        let marker = pool.clone();
        let preloader = ImagePreloader::new(deps.images, config.preload).with_observer(Arc::new(move |id: &str| {
            marker.mark_preloaded(id);
        }));

        Self {
            state,
            network,
            pool,
            controller,
            matches,
            preloader,
            gesture: Mutex::new(PullToRefresh::new(config.gesture)),
            resources: Mutex::new(ResourceRegistry::new()),
            failures: tokio::sync::Mutex::new(failures),
            seen_epoch: AtomicU64::new(0),
            preload_window,
            closed: AtomicBool::new(false),
        }
    }

    /// Initial load: reset fetch of page 1 with the current filters.
    pub async fn start(&self) -> Result<FetchOutcome> {
        let filters = self.filters();
        let result = self.pool.fetch(1, filters, FetchOptions::reset()).await;
        self.after_fetch();
        Ok(result?)
    }

    /// Fetch the next page.
    pub async fn load_more(&self) -> Result<FetchOutcome> {
        let result = self.pool.load_more().await;
        self.after_fetch();
        Ok(result?)
    }

    /// Forced reset fetch. `Ok(None)` when a load or refresh is in progress.
    pub async fn refresh(&self) -> Result<Option<FetchOutcome>> {
        let result = self.pool.refresh().await;
        self.after_fetch();
        Ok(result?)
    }

    /// Explicit retry after a user-visible failure.
    pub async fn retry(&self) -> Result<FetchOutcome> {
        let result = self.pool.retry().await;
        self.after_fetch();
        Ok(result?)
    }

    /// Replace the filters. Unchanged filters return `Ok(None)`.
    pub async fn set_filters(&self, filters: Filters) -> Result<Option<FetchOutcome>> {
        let result = self.pool.set_filters(filters).await;
        self.after_fetch();
        Ok(result?)
    }

    pub fn swipe(&self, direction: SwipeDirection) -> Option<SwipeTicket> {
        let ticket = self.controller.swipe(direction)?;
        self.release_resource(&ticket.record.candidate.id);
        self.preload_upcoming();
        Some(ticket)
    }

    pub fn like(&self) -> Option<SwipeTicket> {
        self.swipe(SwipeDirection::Like)
    }

    pub fn pass(&self) -> Option<SwipeTicket> {
        self.swipe(SwipeDirection::Pass)
    }

    pub fn undo(&self) -> Option<SwipeRecord> {
        self.controller.undo()
    }

    pub fn undo_rollback(&self, token: RollbackToken) -> Result<SwipeTicket> {
        self.controller.undo_rollback(token)
    }

    /// Forward the host's connectivity signal.
    pub fn set_online(&self, online: bool) -> Option<NetworkEvent> {
        let event = self.network.set_online(online)?;
        self.pool.handle_network_change(event);
        Some(event)
    }

    pub fn is_online(&self) -> bool {
        self.network.is_online()
    }

    pub fn pull_start(&self, y: f64, scroll_top: f64) -> bool {
        lock(&self.gesture).touch_start(y, scroll_top)
    }

    /// Returns the damped pull distance for rendering.
    pub fn pull_move(&self, y: f64) -> f64 {
        lock(&self.gesture).touch_move(y)
    }

    pub fn pull_progress(&self) -> f64 {
        lock(&self.gesture).progress()
    }

    /// End the drag; refreshes when it ended past the threshold.
    pub async fn pull_end(&self) -> Result<Option<FetchOutcome>> {
        let request = lock(&self.gesture).touch_end();
        match request {
            Some(_) => self.refresh().await,
            None => Ok(None),
        }
    }

    pub fn pull_cancel(&self) {
        lock(&self.gesture).cancel();
    }

    /// Wait for the next swipe failure.
    pub async fn next_failure(&self) -> Option<SwipeFailure> {
        self.failures.lock().await.recv().await
    }

    /// Swipe failures reported so far and not yet taken
    pub fn take_failures(&self) -> Vec<SwipeFailure> {
        let mut taken = Vec::new();
        if let Ok(mut rx) = self.failures.try_lock() {
            while let Ok(failure) = rx.try_recv() {
                taken.push(failure);
            }
        }
        taken
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        self.pool.snapshot()
    }

    pub fn current(&self) -> Option<Candidate> {
        lock(&self.state).current().cloned()
    }

    pub fn status(&self) -> FetchStatus {
        lock(&self.state).fetch().status
    }

    pub fn filters(&self) -> Filters {
        lock(&self.state).fetch().filters.clone()
    }

    /// Attach a UI resource to a candidate, disposing any it replaces.
    pub fn attach_resource(&self, id: &str, handle: ResourceHandle) {
        lock(&self.resources).register(id, handle);
    }

    pub fn release_resource(&self, id: &str) -> bool {
        lock(&self.resources).release(id).is_some()
    }

    pub fn resource_count(&self) -> usize {
        lock(&self.resources).len()
    }

    /// Wait for background top-ups and match delivery to finish.
    pub async fn settle(&self) {
        self.pool.top_up_settled().await;
        self.matches.settle().await;
    }

    /// Cancel every fetch, retry, submission and pending delivery, and
    /// release all resources. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.pool.close();
        self.controller.close();
        self.matches.close();
        self.preloader.close();
        let released = lock(&self.resources).release_all();
        tracing::info!(released = released.len(), "Feed closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn after_fetch(&self) {
        let epoch = lock(&self.state).epoch();
        if self.seen_epoch.swap(epoch, Ordering::SeqCst) != epoch {
            let released = lock(&self.resources).release_all();
            self.preloader.forget_all();
            if !released.is_empty() {
                tracing::debug!(released = released.len(), "Released resources after reset");
            }
        }
        self.preload_upcoming();
    }

    fn preload_upcoming(&self) {
        if self.is_closed() {
            return;
        }
        let upcoming = self.pool.upcoming(self.preload_window);
        self.preloader.preload(&upcoming);
    }
}

impl Drop for MatchFeed {
    fn drop(&mut self) {
        self.close();
    }
}
