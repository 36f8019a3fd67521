//! Owned feed state and its transitions.
//!
//! `FeedState` is the single owner of the candidate list, the viewing cursor,
//! the swipe history and the fetch bookkeeping. Every method is a synchronous
//! transition; the async orchestration in `CandidatePool` and
//! `SwipeController` takes the lock, applies one transition and releases it.
//!
//! Invariants maintained here:
//! - candidate ids are unique
//! - `cursor == history.len()` and `cursor <= candidates.len()`

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::source::FetchError;
use crate::domain::{Candidate, CandidateId, Filters, SwipeDirection, SwipeRecord};

/// Shared load/refresh status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FetchStatus {
    Idle,
    Loading,
    Refreshing,
    Error,
}

impl FetchStatus {
    /// A load or refresh is in flight
    pub fn is_busy(&self) -> bool {
        matches!(self, FetchStatus::Loading | FetchStatus::Refreshing)
    }
}

/// Pagination and retry bookkeeping, one per pool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchState {
    /// Last page successfully applied (0 before the first load)
    pub page: u32,
    pub filters: Filters,
    /// Viewing cursor into the candidate list
    pub cursor_offset: usize,
    pub has_more: bool,
    pub retry_count: u32,
    pub status: FetchStatus,
    /// Page of the primary fetch in flight or last failed
    pub requested_page: u32,
    /// User-visible error, if any
    #[serde(skip)]
    pub last_error: Option<FetchError>,
}

impl FetchState {
    pub fn new(filters: Filters) -> Self {
        Self {
            page: 0,
            filters,
            cursor_offset: 0,
            has_more: true,
            retry_count: 0,
            status: FetchStatus::Idle,
            requested_page: 1,
            last_error: None,
        }
    }

    /// Mark a primary fetch as started.
    pub fn begin(&mut self, page: u32, refresh: bool) {
        self.requested_page = page;
        self.status = if refresh { FetchStatus::Refreshing } else { FetchStatus::Loading };
        self.last_error = None;
    }

    /// Record a successful page.
    pub fn succeed(&mut self, page: u32, has_more: bool) {
        self.page = self.page.max(page);
        self.has_more = has_more;
        self.retry_count = 0;
        self.status = FetchStatus::Idle;
        self.last_error = None;
    }

    /// Record a page merged by a background top-up. A pending terminal error
    /// is cleared since the pool now holds fresh candidates; an in-flight
    /// primary fetch keeps its status.
    pub fn top_up_succeeded(&mut self, page: u32, has_more: bool) {
        self.page = self.page.max(page);
        self.has_more = has_more;
        if self.status == FetchStatus::Error {
            self.status = FetchStatus::Idle;
            self.retry_count = 0;
            self.last_error = None;
        }
    }

    /// Record a terminal failure. The error becomes user-visible.
    pub fn fail(&mut self, error: FetchError) {
        self.status = FetchStatus::Error;
        self.last_error = Some(error);
    }

    /// Clear a pending offline error after connectivity returns. The status
    /// stays `Error` until a fresh fetch succeeds.
    pub fn clear_offline_error(&mut self) -> bool {
        if matches!(self.last_error, Some(FetchError::Offline)) {
            self.last_error = None;
            true
        } else {
            false
        }
    }
}

/// Result of merging one page into the pool
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    /// Newly pooled candidates, in pool order
    pub accepted: Vec<Candidate>,
    /// Items that passed validation, duplicates included
    pub well_formed: usize,
    pub malformed: usize,
    pub duplicates: usize,
    pub has_more: bool,
}

/// Immutable view of the feed for consumers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedSnapshot {
    pub candidates: Vec<Candidate>,
    pub cursor: usize,
    pub history: Vec<SwipeRecord>,
    pub fetch: FetchState,
}

impl FeedSnapshot {
    /// User-visible fetch error, if any
    pub fn last_error(&self) -> Option<&FetchError> {
        self.fetch.last_error.as_ref()
    }

    /// Candidate currently on screen
    pub fn current(&self) -> Option<&Candidate> {
        self.candidates.get(self.cursor)
    }

    /// Candidates not yet swiped
    pub fn remaining(&self) -> usize {
        self.candidates.len().saturating_sub(self.cursor)
    }
}

/// The engine's single mutable state.
#[derive(Debug, Clone)]
pub struct FeedState {
    candidates: Vec<Candidate>,
    ids: HashSet<CandidateId>,
    history: Vec<SwipeRecord>,
    fetch: FetchState,
    epoch: u64,
    next_seq: u64,
}

impl FeedState {
    pub fn new(filters: Filters) -> Self {
        Self {
            candidates: Vec::new(),
            ids: HashSet::new(),
            history: Vec::new(),
            fetch: FetchState::new(filters),
            epoch: 0,
            next_seq: 1,
        }
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn history(&self) -> &[SwipeRecord] {
        &self.history
    }

    pub fn fetch(&self) -> &FetchState {
        &self.fetch
    }

    pub fn fetch_mut(&mut self) -> &mut FetchState {
        &mut self.fetch
    }

    pub fn cursor(&self) -> usize {
        self.fetch.cursor_offset
    }

    /// Incremented on every reset; async work captured before a reset
    /// compares epochs before applying results.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn current(&self) -> Option<&Candidate> {
        self.candidates.get(self.cursor())
    }

    /// Unconsumed candidates ahead of the cursor, current one included
    pub fn remaining(&self) -> usize {
        self.candidates.len().saturating_sub(self.cursor())
    }

    /// Candidates from the cursor onwards, at most `count`
    pub fn upcoming(&self, count: usize) -> Vec<Candidate> {
        self.candidates.iter().skip(self.cursor()).take(count).cloned().collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn last_direction(&self) -> Option<SwipeDirection> {
        self.history.last().map(|r| r.direction)
    }

    /// Clear candidates, cursor, history and retry state for new filters.
    pub fn reset(&mut self, filters: Filters) {
        self.candidates.clear();
        self.ids.clear();
        self.history.clear();
        self.fetch = FetchState::new(filters);
        self.epoch += 1;
    }

    /// Validate, dedup and score-sort one page of raw items, then append it
    /// (or replace the pool when `replace` is set).
    ///
    /// `has_more` is true iff the accepted (valid, unseen) item count reaches `limit`.
    pub fn merge_page(&mut self, items: Vec<Value>, limit: usize, replace: bool) -> MergeOutcome {
        if replace {
            self.candidates.clear();
            self.ids.clear();
            self.history.clear();
            self.fetch.cursor_offset = 0;
        }

        let mut outcome = MergeOutcome::default();
        let mut fresh = Vec::new();

        for item in items {
            let candidate = match Candidate::from_value(item) {
                Ok(candidate) => candidate,
                Err(e) => {
                    tracing::debug!(error = %e, "Dropping malformed candidate");
                    outcome.malformed += 1;
                    continue;
                }
            };
            outcome.well_formed += 1;

            if !self.ids.insert(candidate.id.clone()) {
                outcome.duplicates += 1;
                continue;
            }
            fresh.push(candidate);
        }

        // Stable: equal scores keep arrival order
        fresh.sort_by(|a, b| b.score.total_cmp(&a.score));

        self.candidates.extend(fresh.iter().cloned());
        outcome.has_more = fresh.len() >= limit;
        outcome.accepted = fresh;
        outcome
    }

    /// Swipe the current candidate: append a record and advance the cursor.
    pub fn advance(&mut self, direction: SwipeDirection, at: DateTime<Utc>) -> Option<SwipeRecord> {
        let candidate = self.current()?.clone();
        let record = SwipeRecord {
            seq: self.next_seq,
            candidate,
            direction,
            at,
        };
        self.next_seq += 1;
        self.history.push(record.clone());
        self.fetch.cursor_offset += 1;
        Some(record)
    }

    /// Undo the most recent swipe. No-op on empty history.
    pub fn undo(&mut self) -> Option<SwipeRecord> {
        let record = self.history.pop()?;
        self.fetch.cursor_offset = self.fetch.cursor_offset.saturating_sub(1);
        Some(record)
    }

    /// Roll cursor and history back to their values before the swipe `seq`.
    ///
    /// Truncates at the tail only. Returns false when the record is no
    /// longer in the history (already undone or cleared by a reset).
    pub fn roll_back(&mut self, seq: u64) -> bool {
        let Some(index) = self.history.iter().position(|r| r.seq == seq) else {
            return false;
        };
        self.history.truncate(index);
        self.fetch.cursor_offset = index;
        true
    }

    /// Mark a candidate's media as preloaded. The only candidate mutation.
    pub fn mark_preloaded(&mut self, id: &str) -> bool {
        match self.candidates.iter_mut().find(|c| c.id == id) {
            Some(candidate) if !candidate.preloaded => {
                candidate.preloaded = true;
                true
            }
            _ => false,
        }
    }

    /// Whether a background top-up should start.
    ///
    /// Never after a terminal failure: only a manual retry re-attempts.
    pub fn needs_top_up(&self, threshold: usize) -> bool {
        self.remaining() <= threshold
            && self.fetch.has_more
            && !self.fetch.status.is_busy()
            && self.fetch.status != FetchStatus::Error
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        FeedSnapshot {
            candidates: self.candidates.clone(),
            cursor: self.cursor(),
            history: self.history.clone(),
            fetch: self.fetch.clone(),
        }
    }
}
