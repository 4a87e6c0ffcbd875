//! FrameSequence - the ordered, editable frame list ("player item").
//!
//! **Why**: playback, thumbnails and export all read the same list of frames,
//! but only the *active* ones. The active subset is derived lazily and cached
//! until the next mutation.
//!
//! # Timing Model
//!
//! - `frame_spacing = duration / frames.len()` is the retime step: frame `i`
//!   sits at `i * spacing` after every structural edit.
//! - `frame_interval = duration / active_count` is the playback interval
//!   (inactive frames are skipped, the remaining ones share the duration).
//!
//! # Labels
//!
//! Runs inserted with `concat`/`replace` are tagged with a `LabelId`. Frames
//! only store the id; the label table lives here and is looked up by id.
//!
//! # Edit atomicity
//!
//! Every edit is validated against a scratch copy first. A rejected edit
//! returns `EditError` and leaves `self` untouched.

use std::time::Duration;

use indexmap::IndexMap;
use log::debug;
use once_cell::sync::OnceCell;

use super::frame::{Frame, ImageSource, LabelId};
use crate::error::EditError;

/// Label table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub id: LabelId,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct FrameSequence {
    frames: Vec<Frame>,
    duration: Duration,
    labels: IndexMap<LabelId, Label>,
    next_label: u32,
    /// Indices of active frames, reset on every mutation.
    active: OnceCell<Vec<usize>>,
}

impl FrameSequence {
    /// Build from frames (times are reassigned).
    pub fn new(frames: Vec<Frame>, duration: Duration) -> Self {
        let mut seq = Self {
            frames,
            duration,
            labels: IndexMap::new(),
            next_label: 1,
            active: OnceCell::new(),
        };
        seq.retime();
        seq
    }

    /// All frames active, evenly spaced over `duration`.
    pub fn from_images(sources: Vec<ImageSource>, duration: Duration) -> Self {
        let frames = sources.into_iter().map(|s| Frame::new(Duration::ZERO, s)).collect();
        Self::new(frames, duration)
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn labels(&self) -> impl Iterator<Item = &Label> {
        self.labels.values()
    }

    pub fn label(&self, id: LabelId) -> Option<&Label> {
        self.labels.get(&id)
    }

    /// Indices (into `frames`) of the active subset, in order.
    pub fn active_indices(&self) -> &[usize] {
        self.active.get_or_init(|| {
            self.frames
                .iter()
                .enumerate()
                .filter(|(_, f)| f.active)
                .map(|(i, _)| i)
                .collect()
        })
    }

    pub fn active_frames(&self) -> Vec<&Frame> {
        self.active_indices().iter().map(|&i| &self.frames[i]).collect()
    }

    pub fn active_count(&self) -> usize {
        self.active_indices().len()
    }

    /// Active frame by its position in the active subset.
    pub fn active_frame(&self, active_index: usize) -> Option<&Frame> {
        self.active_indices().get(active_index).map(|&i| &self.frames[i])
    }

    /// Playback interval: `duration / active_count`.
    pub fn frame_interval(&self) -> Duration {
        match self.active_count() {
            0 => Duration::ZERO,
            n => self.duration / n as u32,
        }
    }

    /// Retime step: `duration / len`.
    pub fn frame_spacing(&self) -> Duration {
        match self.frames.len() {
            0 => Duration::ZERO,
            n => self.duration / n as u32,
        }
    }

    /// Index into `frames` closest to `t`. Ties go to the first frame.
    pub fn nearest_index(&self, t: Duration) -> Option<usize> {
        nearest_by_time(self.frames.iter(), t)
    }

    /// Index into the active subset closest to `t`. Ties go to the first frame.
    pub fn nearest_active_index(&self, t: Duration) -> Option<usize> {
        nearest_by_time(self.active_indices().iter().map(|&i| &self.frames[i]), t)
    }

    /// `nearest_active_index`, with 0 for the empty case.
    pub fn nearest_active_index_or_zero(&self, t: Duration) -> usize {
        self.nearest_active_index(t).unwrap_or(0)
    }

    /// Nearest active frame to `t`.
    pub fn nearest_active_frame(&self, t: Duration) -> Option<&Frame> {
        self.nearest_active_index(t).and_then(|i| self.active_frame(i))
    }

    /// Reassign `time = i * duration / len` for every frame.
    pub fn retime(&mut self) {
        let n = self.frames.len();
        if n > 0 {
            let nanos = self.duration.as_nanos();
            for (i, frame) in self.frames.iter_mut().enumerate() {
                // Integer math so i * duration / n is exact to the nanosecond
                let t = nanos * i as u128 / n as u128;
                frame.time = Duration::from_nanos(t as u64);
            }
        }
        self.invalidate();
    }

    fn invalidate(&mut self) {
        self.active = OnceCell::new();
    }

    /// Toggle one frame. Deactivating the last active frame is rejected.
    pub fn set_active(&mut self, index: usize, active: bool) -> Result<(), EditError> {
        let len = self.frames.len();
        let frame = self.frames.get(index).ok_or(EditError::IndexOutOfRange { index, len })?;
        if frame.active == active {
            return Ok(());
        }
        if !active && self.active_count() <= 1 {
            return Err(EditError::InvalidEdit(
                "cannot deactivate the last active frame".to_string(),
            ));
        }
        self.frames[index].active = active;
        self.invalidate();
        debug!("Frame {} active={}", index, active);
        Ok(())
    }

    fn fresh_label(&mut self, name: impl Into<String>) -> LabelId {
        let id = LabelId(self.next_label);
        self.next_label += 1;
        self.labels.insert(id, Label { id, name: name.into() });
        id
    }

    /// Active frames of `other`, tagged with `label`.
    fn take_active(other: &FrameSequence, label: LabelId) -> Vec<Frame> {
        other
            .active_frames()
            .into_iter()
            .map(|f| Frame { label: Some(label), ..f.clone() })
            .collect()
    }

    /// Indices of frames carrying `label`.
    pub fn label_frames(&self, label: LabelId) -> Vec<usize> {
        self.frames
            .iter()
            .enumerate()
            .filter(|(_, f)| f.label == Some(label))
            .map(|(i, _)| i)
            .collect()
    }

    /// Append `other`'s active frames as a new labelled run.
    ///
    /// Duration grows by the appended frames at `other`'s spacing.
    pub fn concat(&mut self, other: &FrameSequence) -> Result<LabelId, EditError> {
        let mut next = self.clone();
        let label = next.fresh_label(format!("concat-{}", next.next_label));
        let added = Self::take_active(other, label);
        let grow = other.frame_spacing() * added.len() as u32;
        next.frames.extend(added);
        next.duration += grow;
        next.retime();
        next.check_has_active()?;

        *self = next;
        debug!("Concat: {} frames, duration {:?}", self.frames.len(), self.duration);
        Ok(label)
    }

    /// Splice `other`'s active frames in place of the run tagged `on_label`.
    pub fn replace(&mut self, other: &FrameSequence, on_label: LabelId) -> Result<LabelId, EditError> {
        let run = self.label_frames(on_label);
        let Some(&at) = run.first() else {
            return Err(EditError::UnknownLabel(on_label));
        };

        let mut next = self.clone();
        let removed_span = next.frame_spacing() * run.len() as u32;
        next.frames.retain(|f| f.label != Some(on_label));
        next.labels.shift_remove(&on_label);

        let label = next.fresh_label(format!("replace-{}", on_label.0));
        let added = Self::take_active(other, label);
        let added_span = other.frame_spacing() * added.len() as u32;
        next.frames.splice(at..at, added);
        next.duration = next.duration.saturating_sub(removed_span) + added_span;
        next.retime();
        next.check_has_active()?;

        *self = next;
        debug!("Replaced label {} with {}", on_label, label);
        Ok(label)
    }

    /// Remove every frame tagged `label`.
    pub fn delete_by_label(&mut self, label: LabelId) -> Result<usize, EditError> {
        let run = self.label_frames(label);
        if run.is_empty() && !self.labels.contains_key(&label) {
            return Err(EditError::UnknownLabel(label));
        }

        let mut next = self.clone();
        let removed_span = next.frame_spacing() * run.len() as u32;
        next.frames.retain(|f| f.label != Some(label));
        next.labels.shift_remove(&label);
        next.duration = next.duration.saturating_sub(removed_span);
        next.retime();
        next.check_has_active()?;

        *self = next;
        debug!("Deleted label {}: {} frames", label, run.len());
        Ok(run.len())
    }

    fn check_has_active(&self) -> Result<(), EditError> {
        if self.active_count() == 0 {
            return Err(EditError::InvalidEdit(
                "edit would leave no active frames".to_string(),
            ));
        }
        Ok(())
    }
}

fn nearest_by_time<'a>(frames: impl Iterator<Item = &'a Frame>, t: Duration) -> Option<usize> {
    let mut best: Option<(usize, Duration)> = None;
    for (i, frame) in frames.enumerate() {
        let dist = frame.time.abs_diff(t);
        // Strict < keeps the first of equally distant frames
        if best.is_none_or(|(_, d)| dist < d) {
            best = Some((i, dist));
        }
    }
    best.map(|(i, _)| i)
}
