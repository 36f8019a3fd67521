//! Pull-to-refresh gesture recognition.
//!
//! Pure state machine over touch coordinates. The host feeds it touch
//! events; it reports the damped pull distance for rendering and returns a
//! `RefreshRequest` when a gesture ends past the threshold.

/// Configuration for the PullToRefresh gesture.
#[derive(Debug, Clone)]
pub struct GestureConfig {
    /// Pull distance, in pixels, that arms a refresh
    pub threshold: f64,
    /// Multiplier applied to the raw finger travel
    pub damping: f64,
    /// Cap on the pull distance, as a multiple of the threshold
    pub max_factor: f64,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            threshold: 100.0,
            damping: 0.5,
            max_factor: 1.5,
        }
    }
}

/// A completed pull past the threshold
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefreshRequest {
    /// Effective pull distance when the finger lifted
    pub pull: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Idle,
    Tracking { start_y: f64 },
}

/// Drag tracker for one viewport.
#[derive(Debug, Clone)]
pub struct PullToRefresh {
    config: GestureConfig,
    phase: Phase,
    pull: f64,
}

impl PullToRefresh {
    pub fn new(config: GestureConfig) -> Self {
        Self {
            config,
            phase: Phase::Idle,
            pull: 0.0,
        }
    }

    pub fn config(&self) -> &GestureConfig {
        &self.config
    }

    /// Begin tracking. Ignored unless the viewport is at scroll top.
    pub fn touch_start(&mut self, y: f64, scroll_top: f64) -> bool {
        self.pull = 0.0;
        if scroll_top > 0.0 {
            self.phase = Phase::Idle;
            return false;
        }
        self.phase = Phase::Tracking { start_y: y };
        true
    }

    /// Update the pull distance. Returns the effective pull.
    pub fn touch_move(&mut self, y: f64) -> f64 {
        if let Phase::Tracking { start_y } = self.phase {
            self.pull = self.effective_pull(y - start_y);
        }
        self.pull
    }

    /// Finish the gesture, returning a refresh request when past threshold.
    pub fn touch_end(&mut self) -> Option<RefreshRequest> {
        let tracking = matches!(self.phase, Phase::Tracking { .. });
        let pull = self.pull;
        self.reset();

        if tracking && pull > self.config.threshold {
            tracing::debug!(pull, "Pull-to-refresh triggered");
            Some(RefreshRequest { pull })
        } else {
            None
        }
    }

    /// Abort the gesture without refreshing.
    pub fn cancel(&mut self) {
        self.reset();
    }

    /// Current effective pull
    pub fn pull(&self) -> f64 {
        self.pull
    }

    /// Pull as a fraction of the threshold, capped at 1
    pub fn progress(&self) -> f64 {
        if self.config.threshold <= 0.0 {
            return 1.0;
        }
        (self.pull / self.config.threshold).clamp(0.0, 1.0)
    }

    pub fn is_tracking(&self) -> bool {
        matches!(self.phase, Phase::Tracking { .. })
    }

    fn effective_pull(&self, raw: f64) -> f64 {
        let max = self.config.threshold * self.config.max_factor;
        (raw * self.config.damping).clamp(0.0, max)
    }

    fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.pull = 0.0;
    }
}

impl Default for PullToRefresh {
    fn default() -> Self {
        Self::new(GestureConfig::default())
    }
}
