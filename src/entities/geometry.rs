//! Normalized rectangles and pixel sizes.
//!
//! Crop and overlay placement are stored normalized (0..1) so they survive
//! any change of output resolution; they are only turned into pixels when a
//! concrete canvas is known.

use serde::{Deserialize, Serialize};

/// Rectangle in normalized (0..1) coordinates, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl NormRect {
    /// Whole canvas.
    pub const FULL: NormRect = NormRect { x: 0.0, y: 0.0, width: 1.0, height: 1.0 };

    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Clamp into the unit square, keeping at least a sliver of area.
    pub fn clamped(&self) -> Self {
        let x = self.x.clamp(0.0, 1.0);
        let y = self.y.clamp(0.0, 1.0);
        let width = self.width.clamp(0.0, 1.0 - x).max(f32::EPSILON);
        let height = self.height.clamp(0.0, 1.0 - y).max(f32::EPSILON);
        Self { x, y, width, height }
    }

    /// Scale to a pixel canvas: (x, y, w, h), w/h at least 1 and inside the canvas.
    pub fn to_pixels(&self, canvas: PixelSize) -> (u32, u32, u32, u32) {
        let r = self.clamped();
        let cw = canvas.width as f32;
        let ch = canvas.height as f32;
        let x = ((r.x * cw).round() as u32).min(canvas.width.saturating_sub(1));
        let y = ((r.y * ch).round() as u32).min(canvas.height.saturating_sub(1));
        let w = ((r.width * cw).round() as u32).clamp(1, canvas.width - x);
        let h = ((r.height * ch).round() as u32).clamp(1, canvas.height - y);
        (x, y, w, h)
    }

    /// Like `to_pixels` but without clamping to the canvas (overlays may hang off the edge).
    pub fn to_pixels_unclamped(&self, canvas: PixelSize) -> (i64, i64, u32, u32) {
        let cw = canvas.width as f32;
        let ch = canvas.height as f32;
        (
            (self.x * cw).round() as i64,
            (self.y * ch).round() as i64,
            ((self.width * cw).round() as u32).max(1),
            ((self.height * ch).round() as u32).max(1),
        )
    }
}

impl Default for NormRect {
    fn default() -> Self {
        Self::FULL
    }
}

/// Output dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelSize {
    pub width: u32,
    pub height: u32,
}

impl PixelSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const fn square(side: u32) -> Self {
        Self { width: side, height: side }
    }

    pub fn longest_side(&self) -> u32 {
        self.width.max(self.height)
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn aspect(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }

    /// Multiply both sides, never below 1 px.
    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            width: ((self.width as f32 * factor).round() as u32).max(1),
            height: ((self.height as f32 * factor).round() as u32).max(1),
        }
    }

    /// Largest size with the given aspect ratio that fits inside `bound`.
    pub fn fit_aspect(aspect: f32, bound: PixelSize) -> Self {
        if !aspect.is_finite() || aspect <= 0.0 {
            return bound;
        }
        if aspect >= bound.aspect() {
            let height = ((bound.width as f32 / aspect).round() as u32).max(1);
            Self { width: bound.width, height }
        } else {
            let width = ((bound.height as f32 * aspect).round() as u32).max(1);
            Self { width, height: bound.height }
        }
    }
}

impl std::fmt::Display for PixelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_pixels_inside_canvas() {
        let r = NormRect::new(0.25, 0.5, 0.5, 0.5);
        assert_eq!(r.to_pixels(PixelSize::new(100, 40)), (25, 20, 50, 20));

        // Overhanging rect gets clipped to the canvas
        let r = NormRect::new(0.9, 0.9, 0.5, 0.5);
        let (x, y, w, h) = r.to_pixels(PixelSize::new(100, 100));
        assert!(x + w <= 100 && y + h <= 100);
        assert!(w >= 1 && h >= 1);
    }

    #[test]
    fn test_fit_aspect() {
        let bound = PixelSize::square(500);
        assert_eq!(PixelSize::fit_aspect(2.0, bound), PixelSize::new(500, 250));
        assert_eq!(PixelSize::fit_aspect(0.5, bound), PixelSize::new(250, 500));
        assert_eq!(PixelSize::fit_aspect(f32::NAN, bound), bound);
    }

    #[test]
    fn test_scaled_never_zero() {
        assert_eq!(PixelSize::new(500, 500).scaled(0.9), PixelSize::new(450, 450));
        assert_eq!(PixelSize::new(1, 1).scaled(0.1), PixelSize::new(1, 1));
    }
}
