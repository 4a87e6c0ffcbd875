//! Trim window: an inclusive time range on the active timeline.
//!
//! Used for the playback loop range, the export range and per-overlay
//! visibility. `contains()` is the single definition of "inside" for all three.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::entities::sequence::FrameSequence;
use crate::error::EditError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrimWindow {
    left: Duration,
    right: Duration,
}

impl TrimWindow {
    /// Create window, rejecting `left > right`.
    pub fn new(left: Duration, right: Duration) -> Result<Self, EditError> {
        if left > right {
            return Err(EditError::InvalidTrim { left, right });
        }
        Ok(Self { left, right })
    }

    /// Window from the first to the last active frame of `seq`.
    pub fn full(seq: &FrameSequence) -> Self {
        let active = seq.active_frames();
        let left = active.first().map(|f| f.time).unwrap_or_default();
        let right = active.last().map(|f| f.time).unwrap_or_default();
        Self { left, right }
    }

    /// Window spanning frames `[first, last]` of the active subset (clamped).
    pub fn from_active_range(seq: &FrameSequence, first: usize, last: usize) -> Self {
        let active = seq.active_frames();
        if active.is_empty() {
            return Self { left: Duration::ZERO, right: Duration::ZERO };
        }
        let max = active.len() - 1;
        let (a, b) = (first.min(max), last.min(max));
        let (a, b) = if a <= b { (a, b) } else { (b, a) };
        Self { left: active[a].time, right: active[b].time }
    }

    pub fn left(&self) -> Duration {
        self.left
    }

    pub fn right(&self) -> Duration {
        self.right
    }

    /// Length of the selection (`right - left`).
    pub fn gallery_duration(&self) -> Duration {
        self.right - self.left
    }

    /// Inclusive on both bounds.
    pub fn contains(&self, t: Duration) -> bool {
        self.left <= t && t <= self.right
    }

    pub fn clamp(&self, t: Duration) -> Duration {
        t.clamp(self.left, self.right)
    }

    /// Both bounds map into the active subset of `seq`.
    pub fn is_valid_for(&self, seq: &FrameSequence) -> bool {
        seq.active_count() > 0 && self.right <= seq.duration()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::frame::ImageSource;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn test_rejects_inverted_window() {
        assert!(TrimWindow::new(secs(2.0), secs(1.0)).is_err());
        let w = TrimWindow::new(secs(1.0), secs(1.0)).unwrap();
        assert_eq!(w.gallery_duration(), Duration::ZERO);
    }

    #[test]
    fn test_contains_is_inclusive() {
        let w = TrimWindow::new(secs(0.5), secs(1.5)).unwrap();
        assert!(w.contains(secs(0.5)));
        assert!(w.contains(secs(1.5)));
        assert!(!w.contains(secs(1.5001)));
        assert!(!w.contains(secs(0.4999)));
        assert_eq!(w.clamp(secs(3.0)), secs(1.5));
    }

    #[test]
    fn test_full_and_range() {
        let sources = (0..10).map(|i| ImageSource::solid([i as u8, 0, 0, 255], 2, 2)).collect();
        let seq = FrameSequence::from_images(sources, secs(2.0));
        let full = TrimWindow::full(&seq);
        assert_eq!(full.left(), Duration::ZERO);
        assert_eq!(full.right(), seq.frames()[9].time);
        assert!(full.is_valid_for(&seq));

        let w = TrimWindow::from_active_range(&seq, 7, 2);
        assert_eq!(w.left(), seq.frames()[2].time);
        assert_eq!(w.right(), seq.frames()[7].time);
    }
}
