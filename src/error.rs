//! Error kinds shared across the frame store, cache, player and exporter.
//!
//! Each subsystem gets its own enum so callers can match on what actually
//! went wrong:
//! - `EditError`: structural edits rejected before any mutation
//! - `FrameError`: a single image could not be produced (absorbed per sample on export)
//! - `ExportError`: export/calibration outcomes surfaced to the caller
//! - `PlaybackError`: invalid player parameters
//! - `ConfigError`: config file read/parse failures

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::entities::frame::LabelId;

/// Rejected edit on a `FrameSequence`. The sequence is unchanged.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EditError {
    /// Edit would leave the sequence without any active frame.
    #[error("invalid edit: {0}")]
    InvalidEdit(String),
    #[error("unknown label {0}")]
    UnknownLabel(LabelId),
    #[error("frame index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("invalid trim window {left:?}..{right:?}")]
    InvalidTrim { left: Duration, right: Duration },
}

/// Failure to produce one frame image.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("sequence has no active frames")]
    NoActiveFrames,
}

impl From<image::ImageError> for FrameError {
    fn from(e: image::ImageError) -> Self {
        FrameError::Decode(e.to_string())
    }
}

/// Export and calibration failures.
#[derive(Debug, Error)]
pub enum ExportError {
    /// Encoder destination could not be opened. Fatal for the run.
    #[error("failed to open encoder: {0}")]
    EncoderOpen(String),
    #[error("frame encoding failed: {0}")]
    Encode(String),
    #[error("no samples to encode")]
    NoSamples,
    #[error("invalid export config: {0}")]
    InvalidConfig(String),
    #[error("estimated size {estimate} bytes exceeds budget {budget} bytes at the smallest size")]
    BudgetUnattainable { estimate: u64, budget: u64 },
    /// Stopped by session end or explicit cancellation. A terminal outcome, not a fault.
    #[error("operation cancelled")]
    Cancelled,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ExportError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExportError::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlaybackError {
    #[error("playback rate must be positive, got {0}")]
    InvalidRate(f32),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
