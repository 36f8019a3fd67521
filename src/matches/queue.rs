//! Batched, score-ordered, staggered match delivery.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::domain::{MatchEvent, MatchTask};
use crate::sinks::{AnalyticsEvent, AnalyticsSink, NotificationSink};
use crate::sync::lock;

/// Configuration for the MatchQueue.
#[derive(Debug, Clone)]
pub struct MatchQueueConfig {
    /// Tasks awaited together per drain step
    pub batch_size: usize,
    /// Minimum gap between two deliveries
    pub stagger: Duration,
    /// Pause before the next batch when a full batch is still waiting
    pub reschedule_delay: Duration,
}

impl Default for MatchQueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 3,
            stagger: Duration::from_millis(800),
            reschedule_delay: Duration::from_millis(1000),
        }
    }
}

struct QueueInner {
    config: MatchQueueConfig,
    sink: Arc<dyn NotificationSink>,
    analytics: Arc<dyn AnalyticsSink>,
    tasks: Mutex<VecDeque<MatchTask>>,
    draining: AtomicBool,
    drain: Mutex<Option<JoinHandle<()>>>,
    last_delivery: Mutex<Option<Instant>>,
    delivered: AtomicUsize,
    shutdown: CancellationToken,
}

/// FIFO of pending match outcomes.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct MatchQueue {
    inner: Arc<QueueInner>,
}

impl MatchQueue {
    pub fn new(config: MatchQueueConfig, sink: Arc<dyn NotificationSink>, analytics: Arc<dyn AnalyticsSink>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                config,
                sink,
                analytics,
                tasks: Mutex::new(VecDeque::new()),
                draining: AtomicBool::new(false),
                drain: Mutex::new(None),
                last_delivery: Mutex::new(None),
                delivered: AtomicUsize::new(0),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &MatchQueueConfig {
        &self.inner.config
    }

    /// Queue a pending outcome and make sure a drain is running.
    pub fn enqueue(&self, task: MatchTask) {
        if self.inner.shutdown.is_cancelled() {
            tracing::debug!(candidate_id = %task.candidate.id, "Match queue closed, dropping task");
            return;
        }

        lock(&self.inner.tasks).push_back(task);
        if !self.inner.draining.swap(true, Ordering::SeqCst) {
            let queue = self.clone();
            let handle = tokio::spawn(async move { queue.drain().await });
            *lock(&self.inner.drain) = Some(handle);
        }
    }

    /// Tasks not yet taken into a batch
    pub fn pending(&self) -> usize {
        lock(&self.inner.tasks).len()
    }

    /// Events handed to the sink so far
    pub fn delivered(&self) -> usize {
        self.inner.delivered.load(Ordering::SeqCst)
    }

    pub fn is_idle(&self) -> bool {
        !self.inner.draining.load(Ordering::SeqCst) && self.pending() == 0
    }

    /// Wait until every queued task has been drained.
    pub async fn settle(&self) {
        loop {
            let handle = lock(&self.inner.drain).take();
            match handle {
                Some(handle) => {
                    let _ = handle.await;
                }
                None if self.is_idle() || self.inner.shutdown.is_cancelled() => return,
                None => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
    }

    /// Stop delivering. Pending stagger and reschedule timers are discarded
    /// and queued tasks are dropped.
    pub fn close(&self) {
        self.inner.shutdown.cancel();
        lock(&self.inner.tasks).clear();
        if let Some(handle) = lock(&self.inner.drain).take() {
            handle.abort();
        }
        self.inner.draining.store(false, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    async fn drain(&self) {
        let config = &self.inner.config;
        loop {
            let batch: Vec<MatchTask> = {
                let mut tasks = lock(&self.inner.tasks);
                let take = config.batch_size.max(1).min(tasks.len());
                tasks.drain(..take).collect()
            };

            if batch.is_empty() {
                self.inner.draining.store(false, Ordering::SeqCst);
                // An enqueue may have landed between the take and the store
                if self.pending() > 0 && !self.inner.draining.swap(true, Ordering::SeqCst) {
                    continue;
                }
                return;
            }

            let Some(events) = self.resolve_batch(batch).await else {
                return;
            };
            for event in events {
                if !self.deliver(event).await {
                    return;
                }
            }

            let remaining = self.pending();
            if remaining >= config.batch_size {
                tracing::debug!(remaining, "Rescheduling match drain");
                tokio::select! {
                    _ = self.inner.shutdown.cancelled() => return,
                    _ = tokio::time::sleep(config.reschedule_delay) => {}
                }
            }
        }
    }

    /// Await every outcome of the batch independently and keep the matches,
    /// best score first. Returns None when the queue closed meanwhile.
    async fn resolve_batch(&self, batch: Vec<MatchTask>) -> Option<Vec<MatchEvent>> {
        let pending = batch.into_iter().map(|task| async move {
            let candidate = task.candidate;
            let result = task.outcome.await;
            (candidate, result)
        });

        let outcomes = tokio::select! {
            _ = self.inner.shutdown.cancelled() => return None,
            outcomes = join_all(pending) => outcomes,
        };

        let mut events = Vec::new();
        for (candidate, result) in outcomes {
            match result {
                Ok(outcome) if outcome.is_match => events.push(MatchEvent::from_outcome(candidate, outcome)),
                Ok(_) => tracing::debug!(candidate_id = %candidate.id, "No match"),
                Err(e) => tracing::warn!(candidate_id = %candidate.id, error = %e, "Match task failed"),
            }
        }

        // Stable: equal scores keep enqueue order
        events.sort_by(|a, b| b.score.total_cmp(&a.score));
        Some(events)
    }

    /// Deliver one event no sooner than the stagger after the previous one.
    async fn deliver(&self, event: MatchEvent) -> bool {
        let previous = *lock(&self.inner.last_delivery);
        if let Some(previous) = previous {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => return false,
                _ = tokio::time::sleep_until(previous + self.inner.config.stagger) => {}
            }
        }
        if self.inner.shutdown.is_cancelled() {
            return false;
        }

        tracing::info!(candidate_id = %event.matched_user.id, score = event.score, "Delivering match");
        self.inner.analytics.track(AnalyticsEvent::match_created(&event));
        self.inner.sink.deliver(event);
        *lock(&self.inner.last_delivery) = Some(Instant::now());
        self.inner.delivered.fetch_add(1, Ordering::SeqCst);
        true
    }
}
