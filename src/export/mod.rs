//! GIF export: sampling, compositing, encoding and size calibration.

pub mod calibrate;
pub mod compositor;
pub mod config;
pub mod encoder;
pub mod source;

pub use calibrate::{Calibration, CalibrationSettings, GeneratorProbe, Probe, ProbeRound, SizeCalibrator, Verdict};
pub use compositor::{ExportReport, ExportRequest, GifGenerator, sample_count, sample_times};
pub use config::{Destination, ExportConfig, SinkDescriptor, SizePreset};
pub use encoder::{EncodedOutput, Encoder, EncoderFactory, GifEncoderFactory, OutputTarget};
pub use source::{FrameSource, SequenceSource};
