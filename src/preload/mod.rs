//! Image preloading for upcoming candidates.
//!
//! The first few candidates are the priority slice: every photo of each is
//! loaded concurrently. The rest form the background slice: only the hero
//! photo, one candidate at a time, yielding between loads. Failures are
//! logged and forgotten so a later pass can try again.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::domain::{Candidate, CandidateId};
use crate::sync::lock;

/// Errors that can occur while preloading an image
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImageError {
    #[error("Failed to load {url}: {reason}")]
    LoadFailed { url: String, reason: String },

    #[error("Invalid image URL: {0}")]
    InvalidUrl(String),
}

/// Loads one image into the host's cache
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn load(&self, url: &str) -> Result<(), ImageError>;
}

/// Called with the id of each candidate whose media finished loading
pub type PreloadObserver = Arc<dyn Fn(&str) + Send + Sync>;

/// Configuration for the ImagePreloader.
#[derive(Debug, Clone)]
pub struct PreloadConfig {
    /// Candidates in the eager, concurrent slice
    pub priority_count: usize,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self { priority_count: 3 }
    }
}

/// Fire-and-forget media preloader.
#[derive(Clone)]
pub struct ImagePreloader {
    fetcher: Arc<dyn ImageFetcher>,
    config: PreloadConfig,
    claimed: Arc<Mutex<HashSet<CandidateId>>>,
    observer: Option<PreloadObserver>,
    shutdown: CancellationToken,
}

impl ImagePreloader {
    pub fn new(fetcher: Arc<dyn ImageFetcher>, config: PreloadConfig) -> Self {
        Self {
            fetcher,
            config,
            claimed: Arc::new(Mutex::new(HashSet::new())),
            observer: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Report successes to `observer`
    pub fn with_observer(mut self, observer: PreloadObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Preload media for `candidates`, in order.
    ///
    /// Candidates already preloaded or in flight are skipped. Returns the
    /// background task, or None when there was nothing to do.
    pub fn preload(&self, candidates: &[Candidate]) -> Option<JoinHandle<()>> {
        if self.shutdown.is_cancelled() {
            return None;
        }

        let batch: Vec<Candidate> = {
            let mut claimed = lock(&self.claimed);
            candidates
                .iter()
                .filter(|c| !c.preloaded && claimed.insert(c.id.clone()))
                .cloned()
                .collect()
        };
        if batch.is_empty() {
            return None;
        }

        tracing::debug!(count = batch.len(), "Preloading candidate media");
        let preloader = self.clone();
        Some(tokio::spawn(async move {
            tokio::select! {
                _ = preloader.shutdown.cancelled() => {}
                _ = preloader.run(batch) => {}
            }
        }))
    }

    /// Whether `id` is loaded or loading
    pub fn is_claimed(&self, id: &str) -> bool {
        lock(&self.claimed).contains(id)
    }

    /// Forget every claim, e.g. after the pool was reset.
    pub fn forget_all(&self) {
        lock(&self.claimed).clear();
    }

    /// Stop all preloading.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    async fn run(&self, mut batch: Vec<Candidate>) {
        let split = self.config.priority_count.min(batch.len());
        let background = batch.split_off(split);

        join_all(batch.iter().map(|candidate| self.load_all(candidate))).await;

        for candidate in &background {
            tokio::task::yield_now().await;
            self.load_hero(candidate).await;
        }
    }

    async fn load_all(&self, candidate: &Candidate) {
        let loads = candidate.profile.photos.iter().map(|url| self.fetcher.load(url));
        let results = join_all(loads).await;
        let failure = results.into_iter().find_map(|r| r.err());
        self.settle(candidate, failure);
    }

    async fn load_hero(&self, candidate: &Candidate) {
        let failure = match candidate.primary_photo() {
            Some(url) => self.fetcher.load(url).await.err(),
            None => None,
        };
        self.settle(candidate, failure);
    }

    fn settle(&self, candidate: &Candidate, failure: Option<ImageError>) {
        match failure {
            None => {
                if let Some(observer) = &self.observer {
                    observer(&candidate.id);
                }
            }
            Some(e) => {
                lock(&self.claimed).remove(&candidate.id);
                tracing::warn!(candidate_id = %candidate.id, error = %e, "Image preload failed");
            }
        }
    }
}
