//! Export parameters: output config, destinations and size presets.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::entities::geometry::{NormRect, PixelSize};
use crate::error::ExportError;

/// One export/calibration attempt: pixel size, sample rate and per-frame delay.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExportConfig {
    pub pixel_size: PixelSize,
    /// Source-time samples taken per second of the trim window
    pub samples_per_second: f64,
    /// Display time of each encoded frame
    pub frame_delay: Duration,
}

impl ExportConfig {
    pub fn new(pixel_size: PixelSize, samples_per_second: f64, frame_delay: Duration) -> Result<Self, ExportError> {
        let config = Self {
            pixel_size,
            samples_per_second,
            frame_delay,
        };
        config.validate()?;
        Ok(config)
    }

    /// Starting point for calibration.
    ///
    /// The crop's aspect ratio (in source pixels) is fitted into the
    /// destination's initial size. `speed` > 1 samples the source more sparsely
    /// while each encoded frame still shows for `1 / output_fps`.
    pub fn initial(
        destination: &Destination,
        crop: NormRect,
        source_size: PixelSize,
        speed: f64,
        output_fps: f64,
    ) -> Result<Self, ExportError> {
        if !speed.is_finite() || speed <= 0.0 {
            return Err(ExportError::InvalidConfig(format!("speed must be positive, got {}", speed)));
        }
        if !output_fps.is_finite() || output_fps <= 0.0 {
            return Err(ExportError::InvalidConfig(format!(
                "output fps must be positive, got {}",
                output_fps
            )));
        }
        let crop = crop.clamped();
        let crop_w = crop.width * source_size.width as f32;
        let crop_h = crop.height * source_size.height as f32;
        let aspect = if crop_h > 0.0 { crop_w / crop_h } else { 1.0 };
        let pixel_size = PixelSize::fit_aspect(aspect, destination.sink().initial_pixel_size);

        Self::new(pixel_size, output_fps / speed, Duration::from_secs_f64(1.0 / output_fps))
    }

    pub fn with_pixel_size(self, pixel_size: PixelSize) -> Self {
        Self { pixel_size, ..self }
    }

    pub fn validate(&self) -> Result<(), ExportError> {
        if self.pixel_size.width == 0 || self.pixel_size.height == 0 {
            return Err(ExportError::InvalidConfig(format!("empty pixel size {}", self.pixel_size)));
        }
        if !self.samples_per_second.is_finite() || self.samples_per_second <= 0.0 {
            return Err(ExportError::InvalidConfig(format!(
                "samples per second must be positive, got {}",
                self.samples_per_second
            )));
        }
        if self.frame_delay.is_zero() {
            return Err(ExportError::InvalidConfig("frame delay must be non-zero".into()));
        }
        Ok(())
    }
}

/// What the calibrator needs to know about where the output goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkDescriptor {
    pub byte_budget: u64,
    pub initial_pixel_size: PixelSize,
    pub minimum_pixel_size: PixelSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Destination {
    /// Messaging sticker: tight budget, tolerates tiny sizes
    Sticker,
    /// Inline message attachment
    Message,
    /// General-purpose share
    Share,
    Custom(SinkDescriptor),
}

impl Destination {
    pub fn sink(&self) -> SinkDescriptor {
        match *self {
            Destination::Sticker => SinkDescriptor {
                byte_budget: 500 * 1024,
                initial_pixel_size: PixelSize::square(320),
                minimum_pixel_size: PixelSize::square(100),
            },
            Destination::Message => SinkDescriptor {
                byte_budget: 5 * 1024 * 1024,
                initial_pixel_size: PixelSize::square(500),
                minimum_pixel_size: PixelSize::square(200),
            },
            Destination::Share => SinkDescriptor {
                byte_budget: 15 * 1024 * 1024,
                initial_pixel_size: PixelSize::square(640),
                minimum_pixel_size: PixelSize::square(240),
            },
            Destination::Custom(sink) => sink,
        }
    }

    /// Lookup by name (CLI). Custom sinks are built directly.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "sticker" => Some(Destination::Sticker),
            "message" => Some(Destination::Message),
            "share" => Some(Destination::Share),
            _ => None,
        }
    }

    /// Fallback when no calibration round fits the budget: floor size with the
    /// same aspect, sample rate and delay as `base`.
    pub fn lowest_config(&self, base: &ExportConfig) -> ExportConfig {
        base.with_pixel_size(floor_size(base.pixel_size, self.sink().minimum_pixel_size))
    }
}

/// `size`'s aspect fitted into `floor`. Never larger than `size` itself.
pub fn floor_size(size: PixelSize, floor: PixelSize) -> PixelSize {
    let fitted = PixelSize::fit_aspect(size.aspect(), floor);
    if size.longest_side() <= fitted.longest_side() { size } else { fitted }
}

/// Shrink `size` by `fraction`, never going below `floor` on the longest side.
pub fn shrink_size(size: PixelSize, fraction: f32, floor: PixelSize) -> PixelSize {
    let candidate = size.scaled(1.0 - fraction.clamp(0.0, 1.0));
    if candidate.longest_side() < floor.longest_side() {
        floor_size(size, floor)
    } else {
        candidate
    }
}

/// User-facing output size adjustment applied after calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SizePreset {
    Small,
    Medium,
    #[default]
    Large,
}

impl SizePreset {
    pub fn multiplier(&self) -> f32 {
        match self {
            SizePreset::Small => 0.6,
            SizePreset::Medium => 0.8,
            SizePreset::Large => 1.0,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "small" => Some(SizePreset::Small),
            "medium" => Some(SizePreset::Medium),
            "large" => Some(SizePreset::Large),
            _ => None,
        }
    }

    pub fn apply(&self, config: ExportConfig) -> ExportConfig {
        if *self == SizePreset::Large {
            return config;
        }
        config.with_pixel_size(config.pixel_size.scaled(self.multiplier()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_square_crop() {
        let c = ExportConfig::initial(&Destination::Message, NormRect::FULL, PixelSize::square(1080), 1.0, 10.0)
            .unwrap();
        assert_eq!(c.pixel_size, PixelSize::square(500));
        assert_eq!(c.samples_per_second, 10.0);
        assert_eq!(c.frame_delay, Duration::from_millis(100));
    }

    #[test]
    fn test_initial_follows_crop_aspect() {
        // Left half of a 1920x1080 frame: 960x1080
        let crop = NormRect::new(0.0, 0.0, 0.5, 1.0);
        let c = ExportConfig::initial(&Destination::Sticker, crop, PixelSize::new(1920, 1080), 2.0, 10.0).unwrap();
        assert_eq!(c.pixel_size.height, 320);
        assert_eq!(c.pixel_size.width, 284);
        assert_eq!(c.samples_per_second, 5.0);
    }

    #[test]
    fn test_initial_rejects_bad_speed() {
        let r = ExportConfig::initial(&Destination::Share, NormRect::FULL, PixelSize::square(10), 0.0, 10.0);
        assert!(matches!(r, Err(ExportError::InvalidConfig(_))));
    }

    #[test]
    fn test_shrink_sequence() {
        let floor = PixelSize::square(200);
        let a = PixelSize::square(500);
        let b = shrink_size(a, 0.1, floor);
        let c = shrink_size(b, 0.1, floor);
        assert_eq!(b, PixelSize::square(450));
        assert_eq!(c, PixelSize::square(405));
        assert_eq!(shrink_size(PixelSize::square(210), 0.1, floor), floor);
    }

    #[test]
    fn test_lowest_config_per_destination() {
        let base = ExportConfig::new(PixelSize::square(640), 10.0, Duration::from_millis(100)).unwrap();
        assert_eq!(Destination::Sticker.lowest_config(&base).pixel_size, PixelSize::square(100));
        assert_eq!(Destination::Share.lowest_config(&base).pixel_size, PixelSize::square(240));
        assert_eq!(Destination::Share.lowest_config(&base).samples_per_second, 10.0);

        // Already below the floor: the fallback never grows it
        let small = base.with_pixel_size(PixelSize::square(64));
        assert_eq!(Destination::Sticker.lowest_config(&small).pixel_size, PixelSize::square(64));
    }

    #[test]
    fn test_preset_multiplier() {
        let base = ExportConfig::new(PixelSize::square(500), 10.0, Duration::from_millis(100)).unwrap();
        assert_eq!(SizePreset::Small.apply(base).pixel_size, PixelSize::square(300));
        assert_eq!(SizePreset::Medium.apply(base).pixel_size, PixelSize::square(400));
        assert_eq!(SizePreset::Large.apply(base), base);
    }
}
