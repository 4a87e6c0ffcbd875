//! Flipbook - frame-sequence editor core
//!
//! Cached preview playback over a trim window and size-budgeted animated GIF
//! export. Re-exports all modules for use by binary targets.

// Core engine (caches, retrieval, player, workers)
pub mod core;

// Data model and export pipeline
pub mod entities;
pub mod error;
pub mod export;

// App modules
pub mod cli;
pub mod config;
pub mod session;

// Re-export commonly used types
pub use core::cache_man::CacheManager;
pub use core::player::{PlayDirection, Player};
pub use core::retriever::FrameRetriever;
pub use entities::{Frame, FrameSequence, ImageSource, Overlay, TrimWindow};
pub use error::{EditError, ExportError, FrameError, PlaybackError};
pub use export::{Destination, ExportConfig, ExportRequest, GifGenerator, SizeCalibrator, SizePreset};
pub use session::{EditSession, ExportJob, ExportOutcome};
