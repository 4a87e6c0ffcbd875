//! Colour filters applied to each exported frame after crop/resize.
//!
//! Every filter is a pure `RgbaImage -> RgbaImage` transform; alpha is never
//! touched.
//!
//! | Filter | Parameters | Description |
//! |--------|------------|-------------|
//! | **Mono** | - | Rec.709 luma grayscale |
//! | **Sepia** | - | Classic sepia matrix |
//! | **Invert** | - | `1 - c` per channel |
//! | **BrightnessContrast** | `brightness: -1..1`, `contrast: -1..1` | `(v - 0.5) * (1 + contrast) + 0.5 + brightness` |
//! | **AdjustHsv** | `hue_shift: -180..180`, `saturation: 0..2`, `value: 0..2` | HSV colour space |

use image::RgbaImage;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ColorFilter {
    Mono,
    Sepia,
    Invert,
    BrightnessContrast { brightness: f32, contrast: f32 },
    AdjustHsv { hue_shift: f32, saturation: f32, value: f32 },
}

impl ColorFilter {
    /// Preset lookup by name (CLI).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "mono" | "noir" => Some(ColorFilter::Mono),
            "sepia" => Some(ColorFilter::Sepia),
            "invert" => Some(ColorFilter::Invert),
            "vivid" => Some(ColorFilter::AdjustHsv { hue_shift: 0.0, saturation: 1.4, value: 1.05 }),
            "fade" => Some(ColorFilter::BrightnessContrast { brightness: 0.08, contrast: -0.3 }),
            _ => None,
        }
    }

    /// Return a filtered copy.
    pub fn apply(&self, image: &RgbaImage) -> RgbaImage {
        let mut out = image.clone();
        for px in out.pixels_mut() {
            let r = px.0[0] as f32 / 255.0;
            let g = px.0[1] as f32 / 255.0;
            let b = px.0[2] as f32 / 255.0;
            let (r, g, b) = self.map(r, g, b);
            px.0[0] = (r.clamp(0.0, 1.0) * 255.0).round() as u8;
            px.0[1] = (g.clamp(0.0, 1.0) * 255.0).round() as u8;
            px.0[2] = (b.clamp(0.0, 1.0) * 255.0).round() as u8;
        }
        out
    }

    fn map(&self, r: f32, g: f32, b: f32) -> (f32, f32, f32) {
        match *self {
            ColorFilter::Mono => {
                let y = 0.2126 * r + 0.7152 * g + 0.0722 * b;
                (y, y, y)
            }
            ColorFilter::Sepia => (
                0.393 * r + 0.769 * g + 0.189 * b,
                0.349 * r + 0.686 * g + 0.168 * b,
                0.272 * r + 0.534 * g + 0.131 * b,
            ),
            ColorFilter::Invert => (1.0 - r, 1.0 - g, 1.0 - b),
            ColorFilter::BrightnessContrast { brightness, contrast } => {
                let cf = 1.0 + contrast;
                (
                    (r - 0.5) * cf + 0.5 + brightness,
                    (g - 0.5) * cf + 0.5 + brightness,
                    (b - 0.5) * cf + 0.5 + brightness,
                )
            }
            ColorFilter::AdjustHsv { hue_shift, saturation, value } => {
                let (h, s, v) = rgb_to_hsv(r, g, b);
                let h = (h + hue_shift).rem_euclid(360.0);
                let s = (s * saturation).clamp(0.0, 1.0);
                let v = (v * value).clamp(0.0, 1.0);
                hsv_to_rgb(h, s, v)
            }
        }
    }
}

/// RGB (0..1) -> HSV (h in degrees 0..360, s and v 0..1).
fn rgb_to_hsv(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let s = if max > 0.0 { delta / max } else { 0.0 };
    let h = if delta.abs() < 0.0001 {
        0.0
    } else if (max - r).abs() < 0.0001 {
        60.0 * (((g - b) / delta) % 6.0)
    } else if (max - g).abs() < 0.0001 {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let h = if h < 0.0 { h + 360.0 } else { h };

    (h, s, max)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (f32, f32, f32) {
    if s <= 0.0 {
        return (v, v, v);
    }
    let h = h.rem_euclid(360.0);
    let c = v * s;
    let h_prime = h / 60.0;
    let x = c * (1.0 - ((h_prime % 2.0) - 1.0).abs());
    let m = v - c;

    let (r1, g1, b1) = match h_prime as i32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    (r1 + m, g1 + m, b1 + m)
}
