//! Retry scheduling for failed candidate fetches.
//!
//! Failed fetches back off exponentially with bounded jitter so clients that
//! failed together do not retry together:
//!
//! ```text
//! delay = min(base * 2^retry_count + uniform(0, jitter), max_delay)
//! ```
//!
//! The scheduler owns the retry timers. A pending timer is abandoned when its
//! fetch is cancelled (superseded, pool reset, feed closed), when
//! `cancel_pending` is called, or when the network goes offline before it
//! fires. Timers run on tokio's clock, so tests can pause and advance time.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::network::NetworkMonitor;
use crate::pool::FetchError;
use crate::sync::lock;

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry, before jitter.
    pub base_delay: Duration,
    /// Hard cap applied after jitter.
    pub max_delay: Duration,
    /// Upper bound of the uniform jitter.
    pub jitter: Duration,
    /// Automatic retries allowed before a failure becomes terminal.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            jitter: Duration::from_millis(1000),
            max_retries: 3,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with custom values.
    pub fn new(base_delay: Duration, max_delay: Duration, jitter: Duration, max_retries: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter,
            max_retries,
        }
    }

    /// Exponential part of the delay for the given retry count, uncapped.
    pub fn exponential_delay(&self, retry_count: u32) -> Duration {
        let factor = 2u32.checked_pow(retry_count).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Delay with an explicit jitter sample. The sample is clamped to the
    /// policy's jitter bound.
    pub fn delay_with_jitter(&self, retry_count: u32, jitter: Duration) -> Duration {
        self.exponential_delay(retry_count)
            .saturating_add(jitter.min(self.jitter))
            .min(self.max_delay)
    }

    /// Delay with a freshly sampled uniform jitter.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let bound_ms = self.jitter.as_millis() as u64;
        let jitter_ms = if bound_ms == 0 { 0 } else { rand::rng().random_range(0..=bound_ms) };
        self.delay_with_jitter(retry_count, Duration::from_millis(jitter_ms))
    }

    /// Whether another automatic retry is allowed.
    pub fn allows_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry automatically after the delay.
    RetryAfter(Duration),
    /// Stop retrying; the failure is terminal until a manual retry.
    GiveUp,
}

/// Why a scheduled retry never fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonReason {
    Cancelled,
    Offline,
}

/// Outcome of waiting on a retry timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOutcome {
    Fired,
    Abandoned(AbandonReason),
}

/// Owns retry timers and decides retry vs. give-up.
#[derive(Debug)]
pub struct RetryScheduler {
    policy: RetryPolicy,
    network: NetworkMonitor,
    timers: Mutex<CancellationToken>,
    pending: AtomicUsize,
}

impl RetryScheduler {
    pub fn new(policy: RetryPolicy, network: NetworkMonitor) -> Self {
        Self {
            policy,
            network,
            timers: Mutex::new(CancellationToken::new()),
            pending: AtomicUsize::new(0),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Decide whether a failed attempt is retried.
    ///
    /// Only timeouts and server errors are retried. Offline failures never
    /// consume a retry.
    pub fn decide(&self, retry_count: u32, error: &FetchError) -> RetryDecision {
        if !error.is_retryable() || !self.policy.allows_retry(retry_count) {
            return RetryDecision::GiveUp;
        }
        RetryDecision::RetryAfter(self.policy.delay_for(retry_count))
    }

    /// Wait for a retry timer.
    ///
    /// Resolves early with `Abandoned` if `cancel` fires, if `cancel_pending`
    /// is called, or if connectivity drops before the delay elapses.
    pub async fn wait(&self, delay: Duration, cancel: &CancellationToken) -> TimerOutcome {
        if !self.network.is_online() {
            return TimerOutcome::Abandoned(AbandonReason::Offline);
        }

        let timer = lock(&self.timers).child_token();
        let mut connectivity = self.network.subscribe();
        let _pending = PendingTimer::new(&self.pending);

        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                if self.network.is_online() {
                    TimerOutcome::Fired
                } else {
                    TimerOutcome::Abandoned(AbandonReason::Offline)
                }
            }
            _ = cancel.cancelled() => TimerOutcome::Abandoned(AbandonReason::Cancelled),
            _ = timer.cancelled() => TimerOutcome::Abandoned(AbandonReason::Cancelled),
            _ = async {
                let _ = connectivity.wait_for(|online| !*online).await;
            } => TimerOutcome::Abandoned(AbandonReason::Offline),
        }
    }

    /// Abandon every pending retry timer.
    pub fn cancel_pending(&self) {
        let mut timers = lock(&self.timers);
        timers.cancel();
        *timers = CancellationToken::new();
    }

    /// Number of retry timers currently waiting.
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

struct PendingTimer<'a>(&'a AtomicUsize);

impl<'a> PendingTimer<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for PendingTimer<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay, ms(1000));
        assert_eq!(policy.max_delay, ms(10_000));
        assert_eq!(policy.jitter, ms(1000));
        assert_eq!(policy.max_retries, 3);
    }

    #[test]
    fn test_delay_bounds_for_each_retry() {
        let policy = RetryPolicy::default();
        for n in 0..3u32 {
            let floor = ms(1000 * 2u64.pow(n));
            for _ in 0..50 {
                let delay = policy.delay_for(n);
                assert!(delay >= floor, "retry {} delay {:?} below {:?}", n, delay, floor);
                assert!(delay <= floor + ms(1000), "retry {} delay {:?} above bound", n, delay);
                assert!(delay <= ms(10_000));
            }
        }
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_with_jitter(4, ms(999)), ms(10_000));
        assert_eq!(policy.delay_with_jitter(40, ms(0)), ms(10_000));
        assert_eq!(policy.delay_with_jitter(3, ms(500)), ms(8_500));
    }

    #[test]
    fn test_jitter_sample_is_clamped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_with_jitter(0, ms(5_000)), ms(2_000));
    }

    #[test]
    fn test_zero_jitter_policy() {
        let policy = RetryPolicy::new(ms(200), ms(10_000), Duration::ZERO, 3);
        assert_eq!(policy.delay_for(2), ms(800));
    }

    #[test]
    fn test_decide_respects_ceiling() {
        let scheduler = RetryScheduler::new(RetryPolicy::default(), NetworkMonitor::default());
        let err = FetchError::Timeout;

        for n in 0..3 {
            assert!(matches!(scheduler.decide(n, &err), RetryDecision::RetryAfter(_)));
        }
        assert_eq!(scheduler.decide(3, &err), RetryDecision::GiveUp);
    }

    #[test]
    fn test_offline_and_superseded_are_never_retried() {
        let scheduler = RetryScheduler::new(RetryPolicy::default(), NetworkMonitor::default());
        assert_eq!(scheduler.decide(0, &FetchError::Offline), RetryDecision::GiveUp);
        assert_eq!(scheduler.decide(0, &FetchError::Superseded), RetryDecision::GiveUp);

        let server = FetchError::ServerError {
            status: 503,
            message: "unavailable".to_string(),
        };
        assert!(matches!(scheduler.decide(0, &server), RetryDecision::RetryAfter(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_fires_after_delay() {
        let scheduler = RetryScheduler::new(RetryPolicy::default(), NetworkMonitor::default());
        let start = tokio::time::Instant::now();

        let outcome = scheduler.wait(ms(1500), &CancellationToken::new()).await;

        assert_eq!(outcome, TimerOutcome::Fired);
        assert!(start.elapsed() >= ms(1500));
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_abandoned_on_cancel() {
        let scheduler = Arc::new(RetryScheduler::new(RetryPolicy::default(), NetworkMonitor::default()));
        let token = CancellationToken::new();

        let waiter = {
            let scheduler = scheduler.clone();
            let token = token.clone();
            tokio::spawn(async move { scheduler.wait(ms(5000), &token).await })
        };

        tokio::time::sleep(ms(100)).await;
        assert_eq!(scheduler.pending_count(), 1);
        token.cancel();

        assert_eq!(waiter.await.unwrap(), TimerOutcome::Abandoned(AbandonReason::Cancelled));
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_pending_abandons_timers() {
        let scheduler = Arc::new(RetryScheduler::new(RetryPolicy::default(), NetworkMonitor::default()));

        let waiter = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.wait(ms(5000), &CancellationToken::new()).await })
        };

        tokio::time::sleep(ms(100)).await;
        scheduler.cancel_pending();

        assert_eq!(waiter.await.unwrap(), TimerOutcome::Abandoned(AbandonReason::Cancelled));

        // New timers are unaffected by the earlier cancellation
        let outcome = scheduler.wait(ms(10), &CancellationToken::new()).await;
        assert_eq!(outcome, TimerOutcome::Fired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_abandoned_when_going_offline() {
        let network = NetworkMonitor::default();
        let scheduler = Arc::new(RetryScheduler::new(RetryPolicy::default(), network.clone()));

        let waiter = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.wait(ms(5000), &CancellationToken::new()).await })
        };

        tokio::time::sleep(ms(100)).await;
        network.set_online(false);

        assert_eq!(waiter.await.unwrap(), TimerOutcome::Abandoned(AbandonReason::Offline));
    }

    #[tokio::test]
    async fn test_wait_while_offline_returns_immediately() {
        let scheduler = RetryScheduler::new(RetryPolicy::default(), NetworkMonitor::new(false));
        let outcome = scheduler.wait(ms(5000), &CancellationToken::new()).await;
        assert_eq!(outcome, TimerOutcome::Abandoned(AbandonReason::Offline));
    }
}
