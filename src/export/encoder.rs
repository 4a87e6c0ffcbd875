//! Encoder collaborator: turns composited frames into an animated GIF.
//!
//! File output goes to a temporary file next to the destination and is moved
//! into place only by `finalize`; an aborted or dropped encoder leaves nothing
//! behind. Memory output is used by calibration probes.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use gif::{Frame, Repeat};
use image::RgbaImage;
use log::{debug, trace};
use tempfile::NamedTempFile;

use crate::entities::geometry::PixelSize;
use crate::error::ExportError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    File(PathBuf),
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedOutput {
    File { path: PathBuf, bytes: u64 },
    Memory(Vec<u8>),
}

impl EncodedOutput {
    /// Encoded size in bytes.
    pub fn byte_len(&self) -> u64 {
        match self {
            EncodedOutput::File { bytes, .. } => *bytes,
            EncodedOutput::Memory(data) => data.len() as u64,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            EncodedOutput::File { path, .. } => Some(path),
            EncodedOutput::Memory(_) => None,
        }
    }
}

pub trait Encoder: Send {
    fn append(&mut self, image: &RgbaImage, delay: Duration) -> Result<(), ExportError>;
    fn finalize(self: Box<Self>) -> Result<EncodedOutput, ExportError>;
    /// Discard everything written so far.
    fn abort(self: Box<Self>);
}

pub trait EncoderFactory: Send + Sync {
    /// Open an encoder. Failure here is fatal for the export.
    fn create(&self, target: &OutputTarget, size: PixelSize, frame_count: usize)
    -> Result<Box<dyn Encoder>, ExportError>;
}

/// GIF delay in centiseconds. Most decoders treat 0 or 1 as "as fast as
/// possible" and slow it down, so 2 is the floor.
pub fn gif_delay(delay: Duration) -> u16 {
    let cs = (delay.as_secs_f64() * 100.0).round();
    (cs.min(u16::MAX as f64) as u16).max(2)
}

fn encode_err(e: impl std::fmt::Display) -> ExportError {
    ExportError::Encode(e.to_string())
}

#[derive(Debug, Clone, Copy)]
pub struct GifEncoderFactory {
    /// NeuQuant speed, 1 (best) to 30 (fastest)
    pub quantize_speed: i32,
}

impl Default for GifEncoderFactory {
    fn default() -> Self {
        Self { quantize_speed: 10 }
    }
}

impl EncoderFactory for GifEncoderFactory {
    fn create(
        &self,
        target: &OutputTarget,
        size: PixelSize,
        frame_count: usize,
    ) -> Result<Box<dyn Encoder>, ExportError> {
        let (width, height) = match (u16::try_from(size.width), u16::try_from(size.height)) {
            (Ok(w), Ok(h)) if w > 0 && h > 0 => (w, h),
            _ => return Err(ExportError::EncoderOpen(format!("unsupported GIF size {}", size))),
        };

        let sink = match target {
            OutputTarget::File(path) => {
                let dir = match path.parent() {
                    Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
                    _ => PathBuf::from("."),
                };
                let tmp = tempfile::Builder::new()
                    .prefix(".flipbook-")
                    .suffix(".gif.part")
                    .tempfile_in(&dir)
                    .map_err(|e| ExportError::EncoderOpen(format!("{}: {}", dir.display(), e)))?;
                let encoder = open_gif(BufWriter::new(tmp), width, height)?;
                Sink::File {
                    encoder,
                    dest: path.clone(),
                }
            }
            OutputTarget::Memory => Sink::Memory(open_gif(Vec::new(), width, height)?),
        };

        debug!("GIF encoder opened: {} ({} frames expected)", size, frame_count);
        Ok(Box::new(GifEncoder {
            sink,
            width,
            height,
            speed: self.quantize_speed.clamp(1, 30),
            frames: 0,
        }))
    }
}

fn open_gif<W: Write>(writer: W, width: u16, height: u16) -> Result<gif::Encoder<W>, ExportError> {
    let mut encoder =
        gif::Encoder::new(writer, width, height, &[]).map_err(|e| ExportError::EncoderOpen(e.to_string()))?;
    encoder
        .set_repeat(Repeat::Infinite)
        .map_err(|e| ExportError::EncoderOpen(e.to_string()))?;
    Ok(encoder)
}

enum Sink {
    File {
        encoder: gif::Encoder<BufWriter<NamedTempFile>>,
        dest: PathBuf,
    },
    Memory(gif::Encoder<Vec<u8>>),
}

struct GifEncoder {
    sink: Sink,
    width: u16,
    height: u16,
    speed: i32,
    frames: usize,
}

impl Encoder for GifEncoder {
    fn append(&mut self, image: &RgbaImage, delay: Duration) -> Result<(), ExportError> {
        if image.dimensions() != (self.width as u32, self.height as u32) {
            return Err(ExportError::Encode(format!(
                "frame is {}x{}, encoder expects {}x{}",
                image.width(),
                image.height(),
                self.width,
                self.height
            )));
        }
        let mut pixels = image.as_raw().clone();
        let mut frame = Frame::from_rgba_speed(self.width, self.height, &mut pixels, self.speed);
        frame.delay = gif_delay(delay);

        match &mut self.sink {
            Sink::File { encoder, .. } => encoder.write_frame(&frame).map_err(encode_err)?,
            Sink::Memory(encoder) => encoder.write_frame(&frame).map_err(encode_err)?,
        }
        self.frames += 1;
        trace!("GIF frame {} appended (delay {}cs)", self.frames, frame.delay);
        Ok(())
    }

    fn finalize(self: Box<Self>) -> Result<EncodedOutput, ExportError> {
        let frames = self.frames;
        let output = match self.sink {
            Sink::File { encoder, dest } => {
                let writer = encoder.into_inner()?;
                let tmp = writer.into_inner().map_err(|e| e.into_error())?;
                tmp.persist(&dest).map_err(|e| ExportError::Io(e.error))?;
                let bytes = fs::metadata(&dest)?.len();
                EncodedOutput::File { path: dest, bytes }
            }
            Sink::Memory(encoder) => EncodedOutput::Memory(encoder.into_inner()?),
        };
        debug!("GIF finalized: {} frames, {} bytes", frames, output.byte_len());
        Ok(output)
    }

    fn abort(self: Box<Self>) {
        // Dropping the temp file removes it
        debug!("GIF encoder aborted after {} frames", self.frames);
    }
}
