//! Text overlay rasterisation.
//!
//! Uses cosmic-text for shaping and glyph rendering:
//! - Proper text shaping (HarfBuzz)
//! - Unicode support
//! - Multi-line layout (`\n`)
//!
//! The bitmap is tight around the laid-out text; the overlay placement rect
//! then scales it onto the canvas.

use cosmic_text::{
    Attrs as TextAttrs, Buffer, Color, Family, FontSystem, Metrics, Shaping, SwashCache,
};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

// Font system is expensive to create, share it across all text overlays
lazy_static::lazy_static! {
    static ref FONT_SYSTEM: Mutex<FontSystem> = Mutex::new(FontSystem::new());
    static ref SWASH_CACHE: Mutex<SwashCache> = Mutex::new(SwashCache::new());
}

/// Text element style.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextStyle {
    pub text: String,
    /// "sans-serif", "serif", "monospace" or a family name
    pub family: String,
    pub font_size: f32,
    pub line_height: f32,
    /// RGBA 0..1
    pub color: [f32; 4],
    /// RGBA 0..1, transparent by default
    pub background: [f32; 4],
}

impl TextStyle {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Default::default()
        }
    }
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            text: String::new(),
            family: "sans-serif".to_string(),
            font_size: 48.0,
            line_height: 1.2,
            color: [1.0, 1.0, 1.0, 1.0],
            background: [0.0, 0.0, 0.0, 0.0],
        }
    }
}

fn to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0) as u8
}

/// Render `style` into a tight RGBA bitmap (at least 1x1).
pub fn render_text(style: &TextStyle) -> RgbaImage {
    let mut font_system = FONT_SYSTEM.lock().unwrap_or_else(|e| e.into_inner());
    let mut swash_cache = SWASH_CACHE.lock().unwrap_or_else(|e| e.into_inner());

    let line_height = style.font_size * style.line_height;
    let metrics = Metrics::new(style.font_size, line_height);
    let mut buffer = Buffer::new(&mut font_system, metrics);
    buffer.set_size(&mut font_system, Some(4096.0), None);

    let family = match style.family.to_lowercase().as_str() {
        "serif" => Family::Serif,
        "monospace" | "mono" => Family::Monospace,
        "sans-serif" | "sans" => Family::SansSerif,
        _ => Family::Name(&style.family),
    };
    let text_attrs = TextAttrs::new().family(family);
    buffer.set_text(&mut font_system, &style.text, &text_attrs, Shaping::Advanced, None);
    buffer.shape_until_scroll(&mut font_system, false);

    // Bounds of the laid-out runs
    let (width, height) = {
        let mut max_x = 0.0f32;
        let mut max_y = 0.0f32;
        for run in buffer.layout_runs() {
            for glyph in run.glyphs.iter() {
                max_x = max_x.max(glyph.x + glyph.w);
            }
            max_y = max_y.max(run.line_y + line_height);
        }
        ((max_x.ceil() as u32).max(1), (max_y.ceil() as u32).max(1))
    };

    let bg = style.background;
    let mut pixels = RgbaImage::from_pixel(
        width,
        height,
        image::Rgba([to_u8(bg[0]), to_u8(bg[1]), to_u8(bg[2]), to_u8(bg[3])]),
    );

    let c = style.color;
    let text_color = Color::rgba(to_u8(c[0]), to_u8(c[1]), to_u8(c[2]), to_u8(c[3]));

    buffer.draw(&mut font_system, &mut swash_cache, text_color, |x, y, w, h, color| {
        if x < 0 || y < 0 {
            return;
        }
        let src_a = color.a() as f32 / 255.0;
        if src_a <= 0.0 {
            return;
        }
        for dy in 0..h {
            for dx in 0..w {
                let px = x as u32 + dx;
                let py = y as u32 + dy;
                if px >= width || py >= height {
                    continue;
                }
                let dst = pixels.get_pixel_mut(px, py);
                let dst_a = dst.0[3] as f32 / 255.0;
                let out_a = src_a + dst_a * (1.0 - src_a);
                let blend = |s: u8, d: u8| -> u8 {
                    let s = s as f32 / 255.0;
                    let d = d as f32 / 255.0;
                    (((s * src_a + d * dst_a * (1.0 - src_a)) / out_a) * 255.0) as u8
                };
                dst.0 = [
                    blend(color.r(), dst.0[0]),
                    blend(color.g(), dst.0[1]),
                    blend(color.b(), dst.0[2]),
                    (out_a * 255.0) as u8,
                ];
            }
        }
    });

    pixels
}
