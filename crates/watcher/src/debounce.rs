//! Per-watch debounce clock
//!
//! Spaces deliveries for one watch at least one interval apart so a burst
//! of changes is merged into a single batch at the interval boundary.

use std::time::{Duration, Instant};

/// Outcome of asking the clock whether a poll may proceed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Window still open; poll again after this long
    Wait(Duration),
    /// Window elapsed; the clock was advanced to `now`
    Open,
}

/// Tracks the last poll of a watch
#[derive(Debug, Clone)]
pub struct Debouncer {
    interval: Duration,
    last_poll: Option<Instant>,
}

impl Debouncer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_poll: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_poll(&self) -> Option<Instant> {
        self.last_poll
    }

    /// Check the window at `now`, advancing the clock when it has elapsed
    ///
    /// A clock that has never been polled opens immediately. A `now` earlier
    /// than the last poll counts as zero elapsed time.
    pub fn check(&mut self, now: Instant) -> Gate {
        if let Some(last) = self.last_poll {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.interval {
                return Gate::Wait(self.interval - elapsed);
            }
        }

        self.last_poll = Some(now);
        Gate::Open
    }

    /// Forget the last poll so the next check opens immediately
    pub fn reset(&mut self) {
        self.last_poll = None;
    }
}
