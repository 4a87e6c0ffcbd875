//! Size calibration: pick an export config whose estimated size fits a budget.
//!
//! Bounded geometric search. Each round encodes a single sample, extrapolates
//! to the full run and either accepts or shrinks the pixel size:
//!
//! ```text
//! estimate = per_frame_bytes * total_samples * safety_margin
//! ```
//!
//! - at most `max_rounds` probes, run sequentially
//! - shrink never goes below the destination's minimum size
//! - a pixel size is never probed twice
//! - when no round fits, fall back to the destination's lowest config; it is
//!   measured once unless that size was already tested, and only a failing
//!   estimate there makes the budget unattainable
//!
//! The size preset multiplier is applied last. Multipliers are <= 1, so an
//! accepted config stays within budget.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::compositor::{ExportRequest, GifGenerator};
use super::config::{Destination, ExportConfig, SizePreset, shrink_size};
use super::encoder::OutputTarget;
use super::source::FrameSource;
use crate::core::cancel::CancelToken;
use crate::entities::geometry::PixelSize;
use crate::error::ExportError;

/// Measures the encoded size of one sample under a config.
pub trait Probe {
    fn measure(&self, config: &ExportConfig) -> Result<u64, ExportError>;
}

/// Probe backed by the real generator: first sample only, encoded in memory.
pub struct GeneratorProbe<'a> {
    pub generator: &'a GifGenerator,
    pub source: &'a dyn FrameSource,
    pub request: &'a ExportRequest,
}

impl Probe for GeneratorProbe<'_> {
    fn measure(&self, config: &ExportConfig) -> Result<u64, ExportError> {
        let report = self
            .generator
            .generate_limited(self.source, self.request, config, &OutputTarget::Memory, 1)?;
        Ok(report.output.byte_len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    pub max_rounds: usize,
    /// Fraction removed from each side per round
    pub shrink: f32,
    /// Multiplier on the extrapolated size
    pub safety_margin: f64,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            shrink: 0.10,
            safety_margin: 1.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeRound {
    pub config: ExportConfig,
    pub per_frame_bytes: u64,
    pub estimate: u64,
    pub accepted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Round `round` (0-based) fit the budget
    Accepted { round: usize },
    /// Not even the destination's lowest config fits; it is used anyway
    BudgetUnattainable { last_estimate: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    /// Final config, preset applied
    pub config: ExportConfig,
    pub verdict: Verdict,
    pub rounds: Vec<ProbeRound>,
    pub budget: u64,
}

impl Calibration {
    pub fn is_accepted(&self) -> bool {
        matches!(self.verdict, Verdict::Accepted { .. })
    }

    /// Turn the fallback verdict into an error, for callers that require the budget.
    pub fn ensure_within_budget(self) -> Result<Self, ExportError> {
        match self.verdict {
            Verdict::Accepted { .. } => Ok(self),
            Verdict::BudgetUnattainable { last_estimate } => Err(ExportError::BudgetUnattainable {
                estimate: last_estimate,
                budget: self.budget,
            }),
        }
    }
}

pub struct SizeCalibrator<P> {
    probe: P,
    settings: CalibrationSettings,
    cancel: CancelToken,
}

impl<P: Probe> SizeCalibrator<P> {
    pub fn new(probe: P, settings: CalibrationSettings) -> Self {
        Self {
            probe,
            settings,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn calibrate(
        &self,
        initial: ExportConfig,
        total_samples: usize,
        destination: &Destination,
        preset: SizePreset,
    ) -> Result<Calibration, ExportError> {
        initial.validate()?;
        let sink = destination.sink();
        let floor = sink.minimum_pixel_size;
        let mut tested: Vec<PixelSize> = Vec::new();
        let mut rounds: Vec<ProbeRound> = Vec::new();
        let mut current = initial;

        debug!(
            "Calibrating: start {} budget {} bytes, {} samples",
            initial.pixel_size, sink.byte_budget, total_samples
        );

        for round in 0..self.settings.max_rounds {
            if self.cancel.is_cancelled() {
                return Err(ExportError::Cancelled);
            }
            if tested.contains(&current.pixel_size) {
                break;
            }
            tested.push(current.pixel_size);

            let measured = self.measure(current, total_samples, sink.byte_budget)?;
            debug!(
                "Round {}: {} -> {} bytes/frame, estimate {} bytes{}",
                round,
                current.pixel_size,
                measured.per_frame_bytes,
                measured.estimate,
                if measured.accepted { " (accepted)" } else { "" }
            );
            rounds.push(measured);

            if measured.accepted {
                let config = preset.apply(current);
                info!("Calibration accepted {} after {} round(s)", config.pixel_size, round + 1);
                return Ok(Calibration {
                    config,
                    verdict: Verdict::Accepted { round },
                    rounds,
                    budget: sink.byte_budget,
                });
            }
            if current.pixel_size.longest_side() <= floor.longest_side() {
                break;
            }
            current = current.with_pixel_size(shrink_size(current.pixel_size, self.settings.shrink, floor));
        }

        // Rounds exhausted: check the lowest config, reusing its estimate if already tested
        let lowest = destination.lowest_config(&initial);
        let floor_estimate = match rounds.iter().find(|r| r.config.pixel_size == lowest.pixel_size) {
            Some(measured) => measured.estimate,
            None => {
                if self.cancel.is_cancelled() {
                    return Err(ExportError::Cancelled);
                }
                let measured = self.measure(lowest, total_samples, sink.byte_budget)?;
                debug!("Fallback {}: estimate {} bytes", lowest.pixel_size, measured.estimate);
                rounds.push(measured);
                if measured.accepted {
                    let config = preset.apply(lowest);
                    info!("Calibration accepted fallback {}", config.pixel_size);
                    return Ok(Calibration {
                        config,
                        verdict: Verdict::Accepted { round: rounds.len() - 1 },
                        rounds,
                        budget: sink.byte_budget,
                    });
                }
                measured.estimate
            }
        };

        let config = preset.apply(lowest);
        warn!(
            "Budget of {} bytes not reached (estimate {} at {}), exporting anyway",
            sink.byte_budget, floor_estimate, lowest.pixel_size
        );
        Ok(Calibration {
            config,
            verdict: Verdict::BudgetUnattainable {
                last_estimate: floor_estimate,
            },
            rounds,
            budget: sink.byte_budget,
        })
    }

    fn measure(&self, config: ExportConfig, total_samples: usize, budget: u64) -> Result<ProbeRound, ExportError> {
        let per_frame = self.probe.measure(&config)?;
        let estimate = (per_frame as f64 * total_samples as f64 * self.settings.safety_margin).ceil() as u64;
        Ok(ProbeRound {
            config,
            per_frame_bytes: per_frame,
            estimate,
            accepted: estimate <= budget,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::config::SinkDescriptor;
    use std::cell::RefCell;
    use std::time::Duration;

    /// Bytes proportional to pixel area; remembers what it was asked.
    struct AreaProbe {
        bytes_per_pixel: f64,
        seen: RefCell<Vec<PixelSize>>,
    }

    impl AreaProbe {
        fn new(bytes_per_pixel: f64) -> Self {
            Self {
                bytes_per_pixel,
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl Probe for &AreaProbe {
        fn measure(&self, config: &ExportConfig) -> Result<u64, ExportError> {
            self.seen.borrow_mut().push(config.pixel_size);
            Ok((config.pixel_size.area() as f64 * self.bytes_per_pixel) as u64)
        }
    }

    fn start(side: u32) -> ExportConfig {
        ExportConfig::new(PixelSize::square(side), 10.0, Duration::from_millis(100)).unwrap()
    }

    fn custom(budget: u64, initial: u32, floor: u32) -> Destination {
        Destination::Custom(SinkDescriptor {
            byte_budget: budget,
            initial_pixel_size: PixelSize::square(initial),
            minimum_pixel_size: PixelSize::square(floor),
        })
    }

    #[test]
    fn test_accepts_first_round_that_fits() {
        // 500x500 at 0.2 B/px = 50_000 B/frame; 100 samples * 1.2 = 6 MB > 5 MB.
        // 450x450 -> 40_500 * 120 = 4.86 MB <= 5 MB.
        let probe = AreaProbe::new(0.2);
        let cal = SizeCalibrator::new(&probe, CalibrationSettings::default());
        let result = cal
            .calibrate(start(500), 100, &custom(5 * 1024 * 1024, 500, 200), SizePreset::Large)
            .unwrap();

        assert_eq!(result.verdict, Verdict::Accepted { round: 1 });
        assert_eq!(result.config.pixel_size, PixelSize::square(450));
        assert_eq!(*probe.seen.borrow(), vec![PixelSize::square(500), PixelSize::square(450)]);
        assert!(result.clone().ensure_within_budget().is_ok());
    }

    #[test]
    fn test_round_cap_then_fallback() {
        let probe = AreaProbe::new(100.0);
        let cal = SizeCalibrator::new(&probe, CalibrationSettings::default());
        let result = cal
            .calibrate(start(500), 100, &Destination::Message, SizePreset::Large)
            .unwrap();

        assert_eq!(
            *probe.seen.borrow(),
            vec![
                PixelSize::square(500),
                PixelSize::square(450),
                PixelSize::square(405),
                PixelSize::square(200)
            ]
        );
        // 200x200 * 100 B/px * 100 samples * 1.2
        assert_eq!(
            result.verdict,
            Verdict::BudgetUnattainable {
                last_estimate: 480_000_000
            }
        );
        assert_eq!(result.rounds.len(), 4);
        assert_eq!(result.config.pixel_size, PixelSize::square(200));
        assert_eq!(result.config.samples_per_second, 10.0);
        assert!(matches!(
            result.ensure_within_budget(),
            Err(ExportError::BudgetUnattainable { .. })
        ));
    }

    #[test]
    fn test_stops_at_floor_without_retest() {
        let probe = AreaProbe::new(100.0);
        let settings = CalibrationSettings {
            max_rounds: 10,
            ..Default::default()
        };
        let cal = SizeCalibrator::new(&probe, settings);
        let result = cal.calibrate(start(210), 50, &custom(10, 210, 200), SizePreset::Large).unwrap();

        let seen = probe.seen.borrow();
        assert_eq!(*seen, vec![PixelSize::square(210), PixelSize::square(200)]);
        assert_eq!(result.rounds.len(), 2);
        assert_eq!(result.config.pixel_size, PixelSize::square(200));
    }

    #[test]
    fn test_never_tests_same_size_twice() {
        // Shrink of 0 would re-test forever without the guard
        let probe = AreaProbe::new(100.0);
        let settings = CalibrationSettings {
            shrink: 0.0,
            ..Default::default()
        };
        let cal = SizeCalibrator::new(&probe, settings);
        cal.calibrate(start(400), 50, &custom(10, 400, 100), SizePreset::Large).unwrap();
        // 400 once, then the untested fallback once
        assert_eq!(*probe.seen.borrow(), vec![PixelSize::square(400), PixelSize::square(100)]);
    }

    #[test]
    fn test_floor_checked_when_rounds_exhausted() {
        // 500, 450, 405 all exceed 5 MB at 1 B/px; 200x200 * 120 = 4.8 MB fits
        let probe = AreaProbe::new(1.0);
        let cal = SizeCalibrator::new(&probe, CalibrationSettings::default());
        let result = cal
            .calibrate(start(500), 100, &custom(5_000_000, 500, 200), SizePreset::Large)
            .unwrap();

        assert_eq!(
            *probe.seen.borrow(),
            vec![
                PixelSize::square(500),
                PixelSize::square(450),
                PixelSize::square(405),
                PixelSize::square(200)
            ]
        );
        assert_eq!(result.verdict, Verdict::Accepted { round: 3 });
        assert_eq!(result.config.pixel_size, PixelSize::square(200));
        assert_eq!(result.rounds[3].estimate, 4_800_000);
        assert!(result.ensure_within_budget().is_ok());
    }

    #[test]
    fn test_tested_floor_estimate_reused() {
        let probe = AreaProbe::new(100.0);
        let settings = CalibrationSettings {
            max_rounds: 10,
            ..Default::default()
        };
        let cal = SizeCalibrator::new(&probe, settings);
        let result = cal.calibrate(start(210), 50, &custom(10, 210, 200), SizePreset::Large).unwrap();
        // 200x200 * 100 * 50 * 1.2, taken from the floor round
        assert_eq!(
            result.verdict,
            Verdict::BudgetUnattainable {
                last_estimate: 240_000_000
            }
        );
    }

    #[test]
    fn test_preset_applied_last() {
        let probe = AreaProbe::new(0.01);
        let cal = SizeCalibrator::new(&probe, CalibrationSettings::default());
        let result = cal
            .calibrate(start(500), 10, &Destination::Share, SizePreset::Small)
            .unwrap();
        assert_eq!(result.verdict, Verdict::Accepted { round: 0 });
        assert_eq!(result.config.pixel_size, PixelSize::square(300));
        assert_eq!(result.rounds[0].config.pixel_size, PixelSize::square(500));
    }

    #[test]
    fn test_cancelled() {
        let probe = AreaProbe::new(1.0);
        let token = CancelToken::new();
        token.cancel();
        let cal = SizeCalibrator::new(&probe, CalibrationSettings::default()).with_cancel(token);
        let err = cal
            .calibrate(start(300), 10, &Destination::Sticker, SizePreset::Large)
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(probe.seen.borrow().is_empty());
    }
}
