//! Decode collaborator: produces the source image at a timeline instant.

use std::sync::Arc;
use std::time::Duration;

use image::RgbaImage;
use log::debug;
use rayon::prelude::*;

use crate::entities::geometry::PixelSize;
use crate::entities::sequence::FrameSequence;
use crate::error::FrameError;

pub trait FrameSource: Send + Sync {
    /// Source image shown at `t`.
    fn image_at(&self, t: Duration) -> Result<RgbaImage, FrameError>;

    /// Images for many instants, order preserved. Decodes in parallel.
    fn generate_frames(&self, times: &[Duration]) -> Vec<(Duration, Result<RgbaImage, FrameError>)> {
        times.par_iter().map(|&t| (t, self.image_at(t))).collect()
    }

    /// Pixel size of the source (for crop aspect), if known without decoding everything.
    /// Fails only when no frame can be read.
    fn source_size(&self) -> Result<PixelSize, FrameError>;
}

/// Serves an immutable sequence snapshot: the active frame nearest `t`.
#[derive(Debug, Clone)]
pub struct SequenceSource {
    seq: Arc<FrameSequence>,
}

impl SequenceSource {
    pub fn new(seq: Arc<FrameSequence>) -> Self {
        Self { seq }
    }

    pub fn sequence(&self) -> &FrameSequence {
        &self.seq
    }
}

impl FrameSource for SequenceSource {
    fn image_at(&self, t: Duration) -> Result<RgbaImage, FrameError> {
        self.seq
            .nearest_active_frame(t)
            .ok_or(FrameError::NoActiveFrames)?
            .load()
    }

    /// Size of the first active frame that decodes.
    fn source_size(&self) -> Result<PixelSize, FrameError> {
        let mut last_err = FrameError::NoActiveFrames;
        for frame in self.seq.active_frames() {
            match frame.load() {
                Ok(image) => return Ok(PixelSize::new(image.width(), image.height())),
                Err(e) => {
                    debug!("Skipping unreadable frame for source size: {}", e);
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }
}
