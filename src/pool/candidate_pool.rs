//! Candidate pool: fetch lifecycle, cancellation, retry and top-up.
//!
//! At most one primary fetch (user-initiated load, refresh, filter change or
//! manual retry) is in flight. Starting a new one cancels the previous token;
//! the superseded call resolves to `FetchError::Superseded` and its response
//! is never merged.
//!
//! The background top-up is separate: it runs at most once at a time, never
//! retries, and marks the pool exhausted when it fails.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::source::{CandidateSource, FetchError, FetchExtra, FetchRequest, FetchResponse};
use super::state::{FeedSnapshot, FeedState};
use crate::domain::{Candidate, Filters};
use crate::network::{NetworkEvent, NetworkMonitor};
use crate::retry::{AbandonReason, RetryDecision, RetryScheduler, TimerOutcome};
use crate::sync::lock;

/// Shared handle to the feed state
pub type SharedState = Arc<Mutex<FeedState>>;

/// Configuration for the CandidatePool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Page size; resets request twice this many
    pub batch_size: usize,
    /// Remaining-candidate count at or below which a top-up starts
    pub preload_threshold: usize,
    /// Deadline for one fetch attempt
    pub fetch_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            preload_threshold: 3,
            fetch_timeout: Duration::from_secs(15),
        }
    }
}

/// Per-call fetch options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Clear the pool and start again from page 1
    pub reset: bool,
    /// Pull-to-refresh: status goes through `Refreshing`
    pub refresh: bool,
    pub include_details: Option<bool>,
}

impl FetchOptions {
    pub fn reset() -> Self {
        Self {
            reset: true,
            ..Self::default()
        }
    }

    pub fn refresh() -> Self {
        Self {
            reset: true,
            refresh: true,
            ..Self::default()
        }
    }
}

/// Result of a successful fetch
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    /// Candidates newly added to the pool
    pub accepted: Vec<Candidate>,
    pub has_more: bool,
}

/// A primary fetch that has been admitted
struct PrimaryFetch {
    token: CancellationToken,
    page: u32,
    limit: usize,
    reset: bool,
}

/// The single background top-up slot.
///
/// Each top-up is tagged with a generation so a stale task can only clear
/// its own claim.
#[derive(Default)]
struct TopUpSlot {
    generation: u64,
    running: Option<u64>,
    handle: Option<JoinHandle<()>>,
}

struct PoolInner {
    primary: Mutex<Option<CancellationToken>>,
    top_up: Mutex<TopUpSlot>,
    shutdown: CancellationToken,
}

/// Paginated, deduplicated collection of candidates.
///
/// Cloning yields another handle to the same pool.
#[derive(Clone)]
pub struct CandidatePool {
    state: SharedState,
    source: Arc<dyn CandidateSource>,
    network: NetworkMonitor,
    retry: Arc<RetryScheduler>,
    config: PoolConfig,
    inner: Arc<PoolInner>,
}

impl CandidatePool {
    pub fn new(
        state: SharedState,
        source: Arc<dyn CandidateSource>,
        network: NetworkMonitor,
        retry: Arc<RetryScheduler>,
        config: PoolConfig,
    ) -> Self {
        Self {
            state,
            source,
            network,
            retry,
            config,
            inner: Arc::new(PoolInner {
                primary: Mutex::new(None),
                top_up: Mutex::new(TopUpSlot::default()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn state(&self) -> SharedState {
        self.state.clone()
    }

    /// Immutable view for consumers.
    pub fn snapshot(&self) -> FeedSnapshot {
        lock(&self.state).snapshot()
    }

    /// Candidates from the cursor onwards
    pub fn upcoming(&self, count: usize) -> Vec<Candidate> {
        lock(&self.state).upcoming(count)
    }

    /// Fetch a page, retrying transient failures with backoff.
    ///
    /// With `options.reset` (or when `filters` differ from the current ones)
    /// the pool is cleared first and page 1 is requested with a doubled batch.
    pub async fn fetch(&self, page: u32, filters: Filters, options: FetchOptions) -> Result<FetchOutcome, FetchError> {
        if let Err(err) = self.network.ensure_online() {
            self.record_offline();
            return Err(err);
        }

        let primary = self.begin_primary(page, filters, options);
        self.run_primary(primary, options).await
    }

    /// Fetch the page after the last loaded one with the current filters.
    pub async fn load_more(&self) -> Result<FetchOutcome, FetchError> {
        let (page, filters) = {
            let state = lock(&self.state);
            (state.fetch().page + 1, state.fetch().filters.clone())
        };
        self.fetch(page, filters, FetchOptions::default()).await
    }

    /// Pull-to-refresh: reset fetch with a doubled batch.
    ///
    /// Returns `Ok(None)` when ignored because a load or refresh is already
    /// in progress.
    pub async fn refresh(&self) -> Result<Option<FetchOutcome>, FetchError> {
        if let Err(err) = self.network.ensure_online() {
            self.record_offline();
            return Err(err);
        }

        let filters = lock(&self.state).fetch().filters.clone();
        let Some(primary) = self.try_begin_exclusive(filters) else {
            tracing::debug!("Refresh ignored, a load is already in progress");
            return Ok(None);
        };
        self.run_primary(primary, FetchOptions::refresh()).await.map(Some)
    }

    /// Change filters. A change forces a reset; identical filters are a no-op.
    pub async fn set_filters(&self, filters: Filters) -> Result<Option<FetchOutcome>, FetchError> {
        if lock(&self.state).fetch().filters == filters {
            return Ok(None);
        }
        self.fetch(1, filters, FetchOptions::reset()).await.map(Some)
    }

    /// Explicit manual retry after a terminal failure.
    ///
    /// Resets the retry count and re-attempts the page that failed.
    pub async fn retry(&self) -> Result<FetchOutcome, FetchError> {
        let (page, filters, reset) = {
            let mut state = lock(&self.state);
            let fetch = state.fetch_mut();
            fetch.retry_count = 0;
            fetch.last_error = None;
            let page = fetch.requested_page;
            let reset = page <= 1 && state.candidates().is_empty();
            (page, state.fetch().filters.clone(), reset)
        };
        tracing::info!(page, "Manual retry");

        let options = if reset { FetchOptions::reset() } else { FetchOptions::default() };
        self.fetch(page, filters, options).await
    }

    /// React to a connectivity transition.
    pub fn handle_network_change(&self, event: NetworkEvent) {
        match event {
            NetworkEvent::Online => {
                if lock(&self.state).fetch_mut().clear_offline_error() {
                    tracing::info!("Back online, cleared offline error");
                }
            }
            NetworkEvent::Offline => {
                tracing::debug!("Offline, pending retries will be abandoned");
            }
        }
    }

    /// Mark a candidate's media as preloaded.
    pub fn mark_preloaded(&self, id: &str) -> bool {
        lock(&self.state).mark_preloaded(id)
    }

    /// Start a background top-up when few candidates remain.
    ///
    /// Returns true if a top-up was started. Safe to call repeatedly.
    /// Nothing starts while offline; the pool is not marked exhausted.
    pub fn maybe_top_up(&self) -> bool {
        if self.inner.shutdown.is_cancelled() || !self.network.is_online() {
            return false;
        }

        let (page, epoch, filters, last_direction) = {
            let state = lock(&self.state);
            if !state.needs_top_up(self.config.preload_threshold) {
                return false;
            }
            (
                state.fetch().page + 1,
                state.epoch(),
                state.fetch().filters.clone(),
                state.last_direction(),
            )
        };

        let mut slot = lock(&self.inner.top_up);
        if slot.running.is_some() {
            return false;
        }
        slot.generation += 1;
        let generation = slot.generation;
        slot.running = Some(generation);

        let request = FetchRequest {
            page,
            filters,
            limit: self.config.batch_size,
            extra: FetchExtra {
                last_swipe_direction: last_direction,
                include_details: None,
            },
        };

        tracing::debug!(page, generation, "Starting background top-up");
        let pool = self.clone();
        slot.handle = Some(tokio::spawn(async move {
            pool.run_top_up(request, epoch).await;
            pool.release_top_up(generation);
        }));
        true
    }

    /// Clear the top-up claim if it still belongs to `generation`.
    fn release_top_up(&self, generation: u64) {
        let mut slot = lock(&self.inner.top_up);
        if slot.running == Some(generation) {
            slot.running = None;
        }
    }

    /// Wait for the running top-up, if any, to finish.
    pub async fn top_up_settled(&self) {
        let handle = lock(&self.inner.top_up).handle.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Whether a background top-up is in flight
    pub fn is_topping_up(&self) -> bool {
        lock(&self.inner.top_up).running.is_some()
    }

    /// Cancel every in-flight fetch and pending retry timer.
    pub fn close(&self) {
        self.inner.shutdown.cancel();
        if let Some(token) = lock(&self.inner.primary).take() {
            token.cancel();
        }
        self.abort_top_up();
        self.retry.cancel_pending();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    fn record_offline(&self) {
        let mut state = lock(&self.state);
        if !state.fetch().status.is_busy() {
            state.fetch_mut().fail(FetchError::Offline);
        }
        tracing::warn!("Fetch short-circuited, offline");
    }

    fn begin_primary(&self, page: u32, filters: Filters, options: FetchOptions) -> PrimaryFetch {
        let mut state = lock(&self.state);
        let reset = options.reset || state.fetch().filters != filters;
        if reset {
            state.reset(filters);
            self.abort_top_up();
        }

        let page = if reset { 1 } else { page };
        let limit = if reset { self.config.batch_size * 2 } else { self.config.batch_size };
        state.fetch_mut().begin(page, options.refresh);

        let token = self.replace_primary_token();
        PrimaryFetch { token, page, limit, reset }
    }

    fn try_begin_exclusive(&self, filters: Filters) -> Option<PrimaryFetch> {
        let mut state = lock(&self.state);
        if state.fetch().status.is_busy() {
            return None;
        }
        state.reset(filters);
        self.abort_top_up();
        state.fetch_mut().begin(1, true);

        let token = self.replace_primary_token();
        Some(PrimaryFetch {
            token,
            page: 1,
            limit: self.config.batch_size * 2,
            reset: true,
        })
    }

    fn replace_primary_token(&self) -> CancellationToken {
        let token = self.inner.shutdown.child_token();
        if let Some(previous) = lock(&self.inner.primary).replace(token.clone()) {
            previous.cancel();
        }
        token
    }

    fn abort_top_up(&self) {
        let mut slot = lock(&self.inner.top_up);
        if let Some(handle) = slot.handle.take() {
            handle.abort();
        }
        slot.running = None;
    }

    async fn run_primary(&self, primary: PrimaryFetch, options: FetchOptions) -> Result<FetchOutcome, FetchError> {
        loop {
            let err = match self.attempt(&primary, options).await {
                Ok(outcome) => return Ok(outcome),
                Err(FetchError::Superseded) => return Err(FetchError::Superseded),
                Err(err) => err,
            };

            let retry_count = {
                let state = lock(&self.state);
                if primary.token.is_cancelled() {
                    return Err(FetchError::Superseded);
                }
                state.fetch().retry_count
            };

            let delay = match self.retry.decide(retry_count, &err) {
                RetryDecision::RetryAfter(delay) => delay,
                RetryDecision::GiveUp => {
                    tracing::error!(page = primary.page, retry_count, error = %err, "Fetch failed");
                    self.settle_failure(&primary, err.clone());
                    return Err(err);
                }
            };

            lock(&self.state).fetch_mut().retry_count = retry_count + 1;
            tracing::warn!(
                page = primary.page,
                retry_count = retry_count + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Fetch failed, retrying"
            );

            match self.retry.wait(delay, &primary.token).await {
                TimerOutcome::Fired => continue,
                TimerOutcome::Abandoned(AbandonReason::Offline) => {
                    self.settle_failure(&primary, FetchError::Offline);
                    return Err(FetchError::Offline);
                }
                TimerOutcome::Abandoned(AbandonReason::Cancelled) => {
                    if primary.token.is_cancelled() {
                        return Err(FetchError::Superseded);
                    }
                    self.settle_failure(&primary, err.clone());
                    return Err(err);
                }
            }
        }
    }

    /// One attempt: request, race the deadline and cancellation, then merge
    /// unless superseded.
    async fn attempt(&self, primary: &PrimaryFetch, options: FetchOptions) -> Result<FetchOutcome, FetchError> {
        self.network.ensure_online()?;

        let request = {
            let state = lock(&self.state);
            FetchRequest {
                page: primary.page,
                filters: state.fetch().filters.clone(),
                limit: primary.limit,
                extra: FetchExtra {
                    last_swipe_direction: state.last_direction(),
                    include_details: options.include_details,
                },
            }
        };

        let response = self.request(request, &primary.token).await?;

        let outcome = {
            let mut state = lock(&self.state);
            if primary.token.is_cancelled() {
                tracing::debug!(page = primary.page, "Discarding superseded fetch result");
                return Err(FetchError::Superseded);
            }
            let merge = state.merge_page(response.items, primary.limit, primary.reset);
            state.fetch_mut().succeed(primary.page, merge.has_more);
            tracing::info!(
                page = primary.page,
                accepted = merge.accepted.len(),
                malformed = merge.malformed,
                duplicates = merge.duplicates,
                has_more = merge.has_more,
                "Fetched candidates"
            );
            FetchOutcome {
                accepted: merge.accepted,
                has_more: merge.has_more,
            }
        };

        self.maybe_top_up();
        Ok(outcome)
    }

    async fn request(&self, request: FetchRequest, token: &CancellationToken) -> Result<FetchResponse, FetchError> {
        tokio::select! {
            _ = token.cancelled() => Err(FetchError::Superseded),
            result = tokio::time::timeout(self.config.fetch_timeout, self.source.fetch(request)) => {
                match result {
                    Ok(response) => response,
                    Err(_) => Err(FetchError::Timeout),
                }
            }
        }
    }

    fn settle_failure(&self, primary: &PrimaryFetch, err: FetchError) {
        let mut state = lock(&self.state);
        if !primary.token.is_cancelled() {
            state.fetch_mut().fail(err);
        }
    }

    async fn run_top_up(&self, request: FetchRequest, epoch: u64) {
        let page = request.page;
        let limit = request.limit;

        let result = match self.network.ensure_online() {
            Ok(()) => self.request(request, &self.inner.shutdown).await,
            Err(err) => Err(err),
        };

        let mut state = lock(&self.state);
        if state.epoch() != epoch || self.inner.shutdown.is_cancelled() {
            tracing::debug!(page, "Discarding top-up from before a reset");
            return;
        }

        match result {
            Ok(response) => {
                let merge = state.merge_page(response.items, limit, false);
                state.fetch_mut().top_up_succeeded(page, merge.has_more);
                tracing::info!(page, accepted = merge.accepted.len(), has_more = merge.has_more, "Top-up complete");
            }
            Err(FetchError::Offline) => {
                tracing::debug!(page, "Top-up skipped, offline");
            }
            Err(err) => {
                state.fetch_mut().has_more = false;
                tracing::warn!(page, error = %err, "Top-up failed, marking pool exhausted");
            }
        }
    }
}
