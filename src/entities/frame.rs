//! Frames and their image handles.
//!
//! A `Frame` is a time stamp, an active flag and an `ImageSource` handle.
//! The pixels are never stored in the frame itself: they are decoded on
//! demand by the retriever or the exporter and kept in the bounded caches.
//!
//! # Image sources
//!
//! - `ImageSource::Disk`: file written by the frame generator, decoded with `image`
//! - `ImageSource::Memory`: bitmap already in memory (shared, never copied)
//! - `ImageSource::Solid`: synthesised fill (placeholders, tests)
//!
//! Identity is the handle: two frames are equal when they point at the same
//! file / bitmap, whatever their time or active flag.

use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use image::{Rgba, RgbaImage};
use log::trace;
use uuid::Uuid;

use crate::error::FrameError;

/// Foreign key into a sequence's label table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelId(pub u32);

impl std::fmt::Display for LabelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a frame's pixels come from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Disk(PathBuf),
    Memory { id: Uuid, image: Arc<RgbaImage> },
    Solid { rgba: [u8; 4], width: u32, height: u32 },
}

impl ImageSource {
    /// Wrap an in-memory bitmap with a fresh identity.
    pub fn memory(image: RgbaImage) -> Self {
        ImageSource::Memory { id: Uuid::new_v4(), image: Arc::new(image) }
    }

    pub fn solid(rgba: [u8; 4], width: u32, height: u32) -> Self {
        ImageSource::Solid { rgba, width, height }
    }

    /// Decode into an RGBA bitmap.
    pub fn load(&self) -> Result<RgbaImage, FrameError> {
        match self {
            ImageSource::Disk(path) => {
                trace!("Decoding {}", path.display());
                let reader = image::ImageReader::open(path).map_err(|source| FrameError::Io {
                    path: path.clone(),
                    source,
                })?;
                let reader = reader.with_guessed_format().map_err(|source| FrameError::Io {
                    path: path.clone(),
                    source,
                })?;
                Ok(reader.decode()?.to_rgba8())
            }
            ImageSource::Memory { image, .. } => Ok(image.as_ref().clone()),
            ImageSource::Solid { rgba, width, height } => {
                if *width == 0 || *height == 0 {
                    return Err(FrameError::Decode("solid source has zero size".to_string()));
                }
                Ok(RgbaImage::from_pixel(*width, *height, Rgba(*rgba)))
            }
        }
    }

    /// Path on disk, if any.
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            ImageSource::Disk(p) => Some(p),
            _ => None,
        }
    }
}

impl PartialEq for ImageSource {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ImageSource::Disk(a), ImageSource::Disk(b)) => a == b,
            (ImageSource::Memory { id: a, .. }, ImageSource::Memory { id: b, .. }) => a == b,
            (
                ImageSource::Solid { rgba: c1, width: w1, height: h1 },
                ImageSource::Solid { rgba: c2, width: w2, height: h2 },
            ) => c1 == c2 && w1 == w2 && h1 == h2,
            _ => false,
        }
    }
}

impl Eq for ImageSource {}

impl Hash for ImageSource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            ImageSource::Disk(p) => p.hash(state),
            ImageSource::Memory { id, .. } => id.hash(state),
            ImageSource::Solid { rgba, width, height } => {
                rgba.hash(state);
                width.hash(state);
                height.hash(state);
            }
        }
    }
}

/// Single frame of a sequence.
#[derive(Debug, Clone)]
pub struct Frame {
    pub time: Duration,
    pub image: ImageSource,
    pub active: bool,
    /// Group this frame was inserted with (concat/replace), if any.
    pub label: Option<LabelId>,
}

impl Frame {
    pub fn new(time: Duration, image: ImageSource) -> Self {
        Self { time, image, active: true, label: None }
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn load(&self) -> Result<RgbaImage, FrameError> {
        self.image.load()
    }
}

impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        self.image == other.image
    }
}

impl Eq for Frame {}

impl Hash for Frame {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.image.hash(state);
    }
}
