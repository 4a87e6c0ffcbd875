//! Entities - the edit session's data model
//!
//! Frames and their sequence, trim windows, overlays and the pixel-level
//! helpers (geometry, text, filters) used when compositing them.

pub mod filters;
pub mod frame;
pub mod geometry;
pub mod overlay;
pub mod sequence;
pub mod text;
pub mod trim;

pub use filters::ColorFilter;
pub use frame::{Frame, ImageSource, LabelId};
pub use geometry::{NormRect, PixelSize};
pub use overlay::{Overlay, OverlayBitmap, OverlayPayload};
pub use sequence::{FrameSequence, Label};
pub use text::{TextStyle, render_text};
pub use trim::TrimWindow;
