//! Clock/ticker: wake-up signals at a fixed period.
//!
//! Built on `tokio::time`, so "now" is monotonic and tests can drive it with
//! `tokio::time::pause()` / `advance()`.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Periodic tick source for one scheduler loop.
///
/// - First tick fires immediately, then every `period` after construction.
/// - Ticks are not queued: a slow consumer sees at most one pending tick.
/// - After [`Ticker::stop`] no further ticks are observable.
#[derive(Debug)]
pub struct Ticker {
    period: Duration,
    interval: Option<Interval>,
}

impl Ticker {
    /// Create a ticker. `period` must be non-zero (validated by the loop builder).
    pub fn new(period: Duration) -> Self {
        Self::starting_at(Instant::now(), period)
    }

    /// Create a ticker whose first tick fires at `start`.
    pub fn starting_at(start: Instant, period: Duration) -> Self {
        let mut interval = tokio::time::interval_at(start, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            period,
            interval: Some(interval),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Wait for the next tick; `None` once the ticker is stopped.
    pub async fn tick(&mut self) -> Option<Instant> {
        match self.interval.as_mut() {
            Some(interval) => Some(interval.tick().await),
            None => None,
        }
    }

    /// Stop ticking. Calling this more than once is harmless.
    pub fn stop(&mut self) {
        self.interval = None;
    }

    pub fn is_stopped(&self) -> bool {
        self.interval.is_none()
    }
}
