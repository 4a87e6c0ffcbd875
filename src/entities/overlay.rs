//! Sticker and text overlays with their own visibility windows.
//!
//! Visibility is `window.contains(t)`: inclusive on both bounds. Preview and
//! export both go through `Overlay::visible_at`, so what the editor shows at a
//! given time is exactly what gets encoded.
//!
//! Rasterisation (`render`) happens once per export run: the bitmap is scaled
//! to the overlay's placement rect on the output canvas and rotated about its
//! centre.

use std::time::Duration;

use image::{Rgba, RgbaImage, imageops};
use imageproc::geometric_transformations::{Interpolation, rotate_about_center};
use log::debug;
use uuid::Uuid;

use super::frame::ImageSource;
use super::geometry::{NormRect, PixelSize};
use super::text::{TextStyle, render_text};
use super::trim::TrimWindow;
use crate::error::FrameError;

/// What an overlay draws.
#[derive(Debug, Clone)]
pub enum OverlayPayload {
    Sticker(ImageSource),
    Text(TextStyle),
}

#[derive(Debug, Clone)]
pub struct Overlay {
    pub id: Uuid,
    pub payload: OverlayPayload,
    /// Placement on the cropped canvas, normalized.
    pub placement: NormRect,
    /// Rotation in radians, clockwise.
    pub rotation: f32,
    pub window: TrimWindow,
}

/// Overlay rasterised for a concrete canvas.
#[derive(Debug, Clone)]
pub struct OverlayBitmap {
    pub image: RgbaImage,
    /// Top-left position on the canvas (may be negative when hanging off the edge).
    pub x: i64,
    pub y: i64,
}

impl Overlay {
    pub fn sticker(image: ImageSource, placement: NormRect, window: TrimWindow) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload: OverlayPayload::Sticker(image),
            placement,
            rotation: 0.0,
            window,
        }
    }

    pub fn text(style: TextStyle, placement: NormRect, window: TrimWindow) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload: OverlayPayload::Text(style),
            placement,
            rotation: 0.0,
            window,
        }
    }

    pub fn with_rotation(mut self, radians: f32) -> Self {
        self.rotation = radians;
        self
    }

    pub fn is_text(&self) -> bool {
        matches!(self.payload, OverlayPayload::Text(_))
    }

    /// Inclusive visibility test.
    pub fn visible_at(&self, t: Duration) -> bool {
        self.window.contains(t)
    }

    /// Rasterise for `canvas`: scale to placement, rotate, position.
    pub fn render(&self, canvas: PixelSize) -> Result<OverlayBitmap, FrameError> {
        let source = match &self.payload {
            OverlayPayload::Sticker(src) => src.load()?,
            OverlayPayload::Text(style) => render_text(style),
        };

        let (x, y, w, h) = self.placement.to_pixels_unclamped(canvas);
        let scaled = imageops::resize(&source, w, h, imageops::FilterType::Triangle);

        if self.rotation.abs() < 1e-4 {
            return Ok(OverlayBitmap { image: scaled, x, y });
        }

        // Pad to the diagonal so rotated corners stay inside the bitmap
        let diag = ((w as f64).hypot(h as f64)).ceil() as u32;
        let mut padded = RgbaImage::from_pixel(diag, diag, Rgba([0, 0, 0, 0]));
        let off_x = (diag - w) / 2;
        let off_y = (diag - h) / 2;
        imageops::overlay(&mut padded, &scaled, off_x as i64, off_y as i64);
        let rotated = rotate_about_center(
            &padded,
            self.rotation,
            Interpolation::Bilinear,
            Rgba([0, 0, 0, 0]),
        );

        debug!("Overlay {} rendered {}x{} rotated {:.2}rad", self.id, w, h, self.rotation);
        Ok(OverlayBitmap {
            image: rotated,
            x: x - off_x as i64,
            y: y - off_y as i64,
        })
    }
}

impl OverlayBitmap {
    /// Alpha-composite onto `canvas`.
    pub fn draw_onto(&self, canvas: &mut RgbaImage) {
        imageops::overlay(canvas, &self.image, self.x, self.y);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(a: u64, b: u64) -> TrimWindow {
        TrimWindow::new(Duration::from_millis(a), Duration::from_millis(b)).unwrap()
    }

    #[test]
    fn test_visibility_inclusive() {
        let o = Overlay::sticker(ImageSource::solid([255; 4], 4, 4), NormRect::FULL, window(600, 1200));
        assert!(!o.visible_at(Duration::from_millis(599)));
        assert!(o.visible_at(Duration::from_millis(600)));
        assert!(o.visible_at(Duration::from_millis(1200)));
        assert!(!o.visible_at(Duration::from_millis(1201)));
    }

    #[test]
    fn test_render_scales_to_placement() {
        let o = Overlay::sticker(
            ImageSource::solid([255, 0, 0, 255], 8, 8),
            NormRect::new(0.5, 0.25, 0.25, 0.5),
            window(0, 1000),
        );
        let bmp = o.render(PixelSize::new(100, 40)).unwrap();
        assert_eq!(bmp.image.dimensions(), (25, 20));
        assert_eq!((bmp.x, bmp.y), (50, 10));
    }

    #[test]
    fn test_rotated_bitmap_is_padded() {
        let o = Overlay::sticker(
            ImageSource::solid([0, 255, 0, 255], 10, 10),
            NormRect::new(0.0, 0.0, 0.5, 0.5),
            window(0, 1000),
        )
        .with_rotation(std::f32::consts::FRAC_PI_4);
        let bmp = o.render(PixelSize::square(40)).unwrap();
        // 20x20 placement -> 29x29 diagonal canvas
        assert_eq!(bmp.image.dimensions(), (29, 29));
        assert!(bmp.x < 0 && bmp.y < 0);
        // Centre stays opaque
        assert_eq!(bmp.image.get_pixel(14, 14).0[3], 255);
    }

    #[test]
    fn test_draw_onto() {
        let o = Overlay::sticker(
            ImageSource::solid([255, 0, 0, 255], 2, 2),
            NormRect::new(0.5, 0.5, 0.5, 0.5),
            window(0, 1000),
        );
        let mut canvas = RgbaImage::from_pixel(10, 10, Rgba([0, 0, 255, 255]));
        o.render(PixelSize::square(10)).unwrap().draw_onto(&mut canvas);
        assert_eq!(canvas.get_pixel(0, 0).0, [0, 0, 255, 255]);
        assert_eq!(canvas.get_pixel(7, 7).0, [255, 0, 0, 255]);
    }
}
