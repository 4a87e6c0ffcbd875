//! Periodic tick source for playback.
//!
//! At most one tick is scheduled at a time. Changing the interval cancels the
//! pending deadline and starts a fresh one from `now`; there is never a second
//! timer racing the first. Callers pass `now` explicitly so the host loop (or a
//! test) owns the clock.
//!
//! # Usage
//! ```ignore
//! ticker.start(interval, Instant::now());
//! loop {
//!     if ticker.poll(Instant::now()) {
//!         advance();
//!     }
//!     sleep(ticker.time_until_next(Instant::now()).unwrap_or(idle));
//! }
//! ```

use log::trace;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct Ticker {
    interval: Duration,
    /// Next deadline, None when stopped
    next: Option<Instant>,
    /// Bumped on every (re)start so stale handles can be told apart
    generation: u64,
}

impl Ticker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, interval: Duration, now: Instant) {
        self.interval = interval;
        self.next = Some(now + interval);
        self.generation += 1;
        trace!("Ticker started: interval={:?} gen={}", interval, self.generation);
    }

    /// Cancel the pending tick and start over with `interval`.
    pub fn restart(&mut self, interval: Duration, now: Instant) {
        self.stop();
        self.start(interval, now);
    }

    pub fn stop(&mut self) {
        if self.next.take().is_some() {
            trace!("Ticker stopped (gen {})", self.generation);
        }
    }

    pub fn is_running(&self) -> bool {
        self.next.is_some()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True if a tick is due. Fires at most once per call; missed ticks are
    /// dropped and the next deadline is scheduled from `now`.
    pub fn poll(&mut self, now: Instant) -> bool {
        let Some(deadline) = self.next else {
            return false;
        };
        if now < deadline {
            return false;
        }
        self.next = Some(now + self.interval);
        true
    }

    /// Time left before the next tick, None when stopped.
    pub fn time_until_next(&self, now: Instant) -> Option<Duration> {
        self.next.map(|deadline| deadline.saturating_duration_since(now))
    }
}
