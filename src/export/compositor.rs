//! GIF generator: samples the trim window, composites and encodes.
//!
//! # Pipeline
//!
//! ```text
//! sample_times -> chunks -> FrameSource::generate_frames (parallel decode)
//!              -> crop -> resize -> filter -> overlays (parallel, order kept)
//!              -> Encoder::append (sequential)
//! ```
//!
//! Overlay bitmaps are rasterised at most once per run: each overlay has its
//! own `OnceCell`, initialised by whichever sample needs it first and read by
//! every later one.
//!
//! A sample whose source image cannot be decoded is dropped with a warning.
//! Failing to open the encoder aborts the run.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use image::RgbaImage;
use image::imageops::{self, FilterType};
use log::{debug, info, warn};
use once_cell::sync::OnceCell;
use rayon::prelude::*;

use super::config::ExportConfig;
use super::encoder::{EncodedOutput, Encoder, EncoderFactory, OutputTarget};
use super::source::FrameSource;
use crate::core::cancel::CancelToken;
use crate::core::player::PlayDirection;
use crate::entities::filters::ColorFilter;
use crate::entities::geometry::{NormRect, PixelSize};
use crate::entities::overlay::{Overlay, OverlayBitmap};
use crate::entities::trim::TrimWindow;
use crate::error::ExportError;

/// Everything about an export except the output config.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub trim: TrimWindow,
    /// Playback speed multiplier, > 0
    pub speed: f64,
    pub crop: NormRect,
    pub filter: Option<ColorFilter>,
    /// Drawn in this order
    pub overlays: Vec<Overlay>,
    pub direction: PlayDirection,
}

impl ExportRequest {
    pub fn new(trim: TrimWindow) -> Self {
        Self {
            trim,
            speed: 1.0,
            crop: NormRect::FULL,
            filter: None,
            overlays: Vec::new(),
            direction: PlayDirection::Forward,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportReport {
    pub output: EncodedOutput,
    pub frames_written: usize,
    /// Samples skipped because their source image failed to decode
    pub frames_dropped: usize,
    pub delay: Duration,
    pub config: ExportConfig,
}

/// Number of samples for a window: `floor(gallery * sps) + 1`.
pub fn sample_count(trim: &TrimWindow, samples_per_second: f64) -> usize {
    let exact = trim.gallery_duration().as_secs_f64() * samples_per_second;
    // Absorb float noise like 2.9999999999999996
    (exact + 1e-9).floor() as usize + 1
}

/// Sample instants from `trim.left` at `1 / sps` spacing, never past
/// `trim.right`. Reversed for backward playback.
pub fn sample_times(trim: &TrimWindow, samples_per_second: f64, direction: PlayDirection) -> Vec<Duration> {
    let count = sample_count(trim, samples_per_second);
    let mut times: Vec<Duration> = (0..count)
        .map(|i| {
            let offset = Duration::from_nanos((i as f64 * 1e9 / samples_per_second).round() as u64);
            (trim.left() + offset).min(trim.right())
        })
        .collect();
    if direction == PlayDirection::Backward {
        times.reverse();
    }
    times
}

/// Per-run overlay bitmap cache.
struct OverlayBitmaps<'a> {
    overlays: &'a [Overlay],
    cells: Vec<OnceCell<Option<OverlayBitmap>>>,
    canvas: PixelSize,
    renders: AtomicUsize,
}

impl<'a> OverlayBitmaps<'a> {
    fn new(overlays: &'a [Overlay], canvas: PixelSize) -> Self {
        Self {
            overlays,
            cells: overlays.iter().map(|_| OnceCell::new()).collect(),
            canvas,
            renders: AtomicUsize::new(0),
        }
    }

    fn get(&self, i: usize) -> Option<&OverlayBitmap> {
        self.cells[i]
            .get_or_init(|| {
                self.renders.fetch_add(1, Ordering::Relaxed);
                match self.overlays[i].render(self.canvas) {
                    Ok(bitmap) => Some(bitmap),
                    Err(e) => {
                        warn!("Overlay {} failed to render, skipping: {}", self.overlays[i].id, e);
                        None
                    }
                }
            })
            .as_ref()
    }

    fn renders(&self) -> usize {
        self.renders.load(Ordering::Relaxed)
    }
}

/// Export compositor.
pub struct GifGenerator {
    factory: Arc<dyn EncoderFactory>,
    cancel: CancelToken,
    chunk_size: usize,
}

impl GifGenerator {
    pub fn new(factory: Arc<dyn EncoderFactory>) -> Self {
        Self {
            factory,
            cancel: CancelToken::new(),
            chunk_size: 16,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Samples decoded and composited per batch.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Full export run.
    pub fn generate(
        &self,
        source: &dyn FrameSource,
        request: &ExportRequest,
        config: &ExportConfig,
        target: &OutputTarget,
    ) -> Result<ExportReport, ExportError> {
        self.run(source, request, config, target, None)
    }

    /// Run that stops after `limit` frames are written (calibration probes).
    /// Samples that fail to decode do not count toward the limit.
    pub fn generate_limited(
        &self,
        source: &dyn FrameSource,
        request: &ExportRequest,
        config: &ExportConfig,
        target: &OutputTarget,
        limit: usize,
    ) -> Result<ExportReport, ExportError> {
        self.run(source, request, config, target, Some(limit))
    }

    fn run(
        &self,
        source: &dyn FrameSource,
        request: &ExportRequest,
        config: &ExportConfig,
        target: &OutputTarget,
        limit: Option<usize>,
    ) -> Result<ExportReport, ExportError> {
        config.validate()?;
        let times = sample_times(&request.trim, config.samples_per_second, request.direction);
        let wanted = limit.map_or(times.len(), |l| l.min(times.len()));
        if wanted == 0 {
            return Err(ExportError::NoSamples);
        }
        if self.cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }

        if limit.is_none() {
            info!(
                "Export: {} samples at {} ({:.2} sps, delay {:?})",
                times.len(),
                config.pixel_size,
                config.samples_per_second,
                config.frame_delay
            );
        }

        let chunk_size = match limit {
            Some(l) => l.clamp(1, self.chunk_size),
            None => self.chunk_size,
        };
        let mut encoder = self.factory.create(target, config.pixel_size, wanted)?;
        let bitmaps = OverlayBitmaps::new(&request.overlays, config.pixel_size);
        let mut written = 0usize;
        let mut dropped = 0usize;

        'chunks: for chunk in times.chunks(chunk_size) {
            if self.cancel.is_cancelled() {
                return Err(abort(encoder));
            }

            let composed: Vec<Option<RgbaImage>> = source
                .generate_frames(chunk)
                .into_par_iter()
                .map(|(t, decoded)| match decoded {
                    Ok(image) => Some(composite(&image, t, request, config.pixel_size, &bitmaps)),
                    Err(e) => {
                        warn!("Dropping sample at {:?}: {}", t, e);
                        None
                    }
                })
                .collect();

            for image in composed {
                match image {
                    Some(image) => {
                        if let Err(e) = encoder.append(&image, config.frame_delay) {
                            encoder.abort();
                            return Err(e);
                        }
                        written += 1;
                        if written == wanted {
                            break 'chunks;
                        }
                    }
                    None => dropped += 1,
                }
            }
        }

        if self.cancel.is_cancelled() {
            return Err(abort(encoder));
        }
        if written == 0 {
            encoder.abort();
            return Err(ExportError::NoSamples);
        }

        let output = encoder.finalize()?;
        debug!("Overlay bitmaps rendered: {}", bitmaps.renders());
        if limit.is_none() {
            info!(
                "Export done: {} frames ({} dropped), {} bytes",
                written,
                dropped,
                output.byte_len()
            );
        }

        Ok(ExportReport {
            output,
            frames_written: written,
            frames_dropped: dropped,
            delay: config.frame_delay,
            config: *config,
        })
    }
}

fn abort(encoder: Box<dyn Encoder>) -> ExportError {
    info!("Export cancelled");
    encoder.abort();
    ExportError::Cancelled
}

/// Crop, resize, filter and draw the overlays visible at `t`.
fn composite(
    image: &RgbaImage,
    t: Duration,
    request: &ExportRequest,
    size: PixelSize,
    bitmaps: &OverlayBitmaps<'_>,
) -> RgbaImage {
    let source_size = PixelSize::new(image.width(), image.height());
    let (x, y, w, h) = request.crop.to_pixels(source_size);
    let cropped = imageops::crop_imm(image, x, y, w, h).to_image();

    let mut frame = if cropped.dimensions() == (size.width, size.height) {
        cropped
    } else {
        imageops::resize(&cropped, size.width, size.height, FilterType::Triangle)
    };

    if let Some(filter) = &request.filter {
        frame = filter.apply(&frame);
    }

    for (i, overlay) in request.overlays.iter().enumerate() {
        if overlay.visible_at(t)
            && let Some(bitmap) = bitmaps.get(i)
        {
            bitmap.draw_onto(&mut frame);
        }
    }
    frame
}
