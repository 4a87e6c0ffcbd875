//! Playback engine: a cooperative, single-threaded loop over the active frames
//!
//! **Architecture**: Player does NOT own the sequence. It receives
//! `&FrameSequence` when it needs frame data, so the session's snapshot is the
//! single source of truth and an edit never leaves a stale copy here.
//!
//! **Why**: Preview playback needs:
//! - Stepping by active frame, not wall-clock time (dropped ticks are skipped)
//! - Looping inside the trim window in either direction
//! - Rate changes without a second timer racing the first
//!
//! # Timing Model
//!
//! One tick per `frame_interval / rate`. `update()` is called by the host loop
//! with the current instant; when the ticker fires the player moves one active
//! frame in `direction`.
//!
//! # Bounds
//!
//! Playback is confined to `[nearest_active_index(trim.left),
//! nearest_active_index(trim.right)]`. Stepping past either end wraps to the
//! opposite one (or stops there when looping is disabled).
//!
//! All mutation goes through `&mut self`; there is no interior locking.

use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::core::ticker::Ticker;
use crate::entities::sequence::FrameSequence;
use crate::entities::trim::TrimWindow;
use crate::error::PlaybackError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlayDirection {
    #[default]
    Forward,
    Backward,
}

impl PlayDirection {
    pub fn reversed(self) -> Self {
        match self {
            PlayDirection::Forward => PlayDirection::Backward,
            PlayDirection::Backward => PlayDirection::Forward,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Player {
    /// Position in the active subset
    current: usize,
    direction: PlayDirection,
    rate: f32,
    paused: bool,
    loop_enabled: bool,
    /// None = whole active range
    trim: Option<TrimWindow>,
    ticker: Ticker,
}

impl Default for Player {
    fn default() -> Self {
        Self::new()
    }
}

impl Player {
    /// Paused at the first active frame, forward, rate 1.0, looping.
    pub fn new() -> Self {
        Self {
            current: 0,
            direction: PlayDirection::Forward,
            rate: 1.0,
            paused: true,
            loop_enabled: true,
            trim: None,
            ticker: Ticker::new(),
        }
    }

    // === Accessors ===

    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Time of the current active frame (zero for an empty sequence).
    pub fn current_time(&self, seq: &FrameSequence) -> Duration {
        seq.active_frame(self.current).map(|f| f.time).unwrap_or_default()
    }

    pub fn direction(&self) -> PlayDirection {
        self.direction
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn loop_enabled(&self) -> bool {
        self.loop_enabled
    }

    pub fn set_loop_enabled(&mut self, enabled: bool) {
        self.loop_enabled = enabled;
    }

    pub fn trim(&self) -> Option<TrimWindow> {
        self.trim
    }

    pub fn ticker(&self) -> &Ticker {
        &self.ticker
    }

    /// Tick interval for `seq` at the current rate.
    pub fn tick_interval(&self, seq: &FrameSequence) -> Duration {
        Duration::from_secs_f64(seq.frame_interval().as_secs_f64() / self.rate as f64)
    }

    /// Inclusive active-index bounds for stepping, None for an empty sequence.
    pub fn bounds(&self, seq: &FrameSequence) -> Option<(usize, usize)> {
        let count = seq.active_count();
        if count == 0 {
            return None;
        }
        match self.trim {
            Some(trim) => {
                let lo = seq.nearest_active_index_or_zero(trim.left());
                let hi = seq.nearest_active_index_or_zero(trim.right());
                Some((lo.min(hi), lo.max(hi)))
            }
            None => Some((0, count - 1)),
        }
    }

    // === Playback loop ===

    /// Advance if a tick is due. Returns the new active index when it changed.
    pub fn update(&mut self, seq: &FrameSequence, now: Instant) -> Option<usize> {
        if self.paused || !self.ticker.poll(now) {
            return None;
        }
        self.step(seq)
    }

    /// Move one active frame in `direction`, wrapping inside the bounds.
    pub fn step(&mut self, seq: &FrameSequence) -> Option<usize> {
        let (lo, hi) = self.bounds(seq)?;
        let current = self.current;

        let next = match self.direction {
            PlayDirection::Forward => {
                if current >= hi || current < lo {
                    if current >= hi && !self.loop_enabled {
                        trace!("Reached play range end, stopping");
                        self.pause();
                        hi
                    } else {
                        trace!("Frame loop: {} -> {}", current, lo);
                        lo
                    }
                } else {
                    current + 1
                }
            }
            PlayDirection::Backward => {
                if current <= lo || current > hi {
                    if current <= lo && !self.loop_enabled {
                        trace!("Reached play range start, stopping");
                        self.pause();
                        lo
                    } else {
                        trace!("Frame loop: {} -> {}", current, hi);
                        hi
                    }
                } else {
                    current - 1
                }
            }
        };

        if next == current {
            return None;
        }
        self.current = next;
        Some(next)
    }

    /// Snap to the active frame nearest `t`. Direction and pause state are kept.
    pub fn seek(&mut self, seq: &FrameSequence, t: Duration) -> usize {
        self.current = seq.nearest_active_index_or_zero(t);
        trace!("Seek {:?} -> active {}", t, self.current);
        self.current
    }

    pub fn play(&mut self, seq: &FrameSequence, now: Instant) {
        if self.paused {
            self.paused = false;
            self.ticker.start(self.tick_interval(seq), now);
            debug!("Playback started ({:?}, rate {})", self.direction, self.rate);
        }
    }

    pub fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            self.ticker.stop();
            debug!("Playback paused at active {}", self.current);
        }
    }

    pub fn toggle(&mut self, seq: &FrameSequence, now: Instant) {
        if self.paused {
            self.play(seq, now);
        } else {
            self.pause();
        }
    }

    pub fn set_direction(&mut self, direction: PlayDirection) {
        self.direction = direction;
    }

    pub fn reverse(&mut self) {
        self.direction = self.direction.reversed();
    }

    /// Replace the rate and restart the tick from `now` if playing.
    pub fn set_rate(&mut self, seq: &FrameSequence, rate: f32, now: Instant) -> Result<(), PlaybackError> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(PlaybackError::InvalidRate(rate));
        }
        self.rate = rate;
        if !self.paused {
            self.ticker.restart(self.tick_interval(seq), now);
        }
        debug!("Playback rate set to {}", rate);
        Ok(())
    }

    /// Replace the loop window and pull the current frame back inside it.
    pub fn set_trim(&mut self, seq: &FrameSequence, trim: Option<TrimWindow>) {
        self.trim = trim;
        self.clamp_into_bounds(seq);
    }

    /// Re-validate after a structural edit of `seq`: drop a trim window that no
    /// longer fits, clamp the position and restart the tick with the new interval.
    pub fn resync(&mut self, seq: &FrameSequence, now: Instant) {
        if let Some(trim) = self.trim
            && !trim.is_valid_for(seq)
        {
            debug!("Trim window no longer valid, resetting to full range");
            self.trim = None;
        }
        self.clamp_into_bounds(seq);
        if !self.paused {
            self.ticker.restart(self.tick_interval(seq), now);
        }
    }

    fn clamp_into_bounds(&mut self, seq: &FrameSequence) {
        match self.bounds(seq) {
            Some((lo, hi)) => {
                let clamped = self.current.clamp(lo, hi);
                if clamped != self.current {
                    trace!("Clamped active {} -> {}", self.current, clamped);
                    self.current = clamped;
                }
            }
            None => self.current = 0,
        }
    }
}
