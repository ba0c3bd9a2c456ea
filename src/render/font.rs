use std::path::Path;

use font8x8::{BASIC_FONTS, LATIN_FONTS, UnicodeFonts};
use fontdue::{Font, FontSettings};
use image::RgbaImage;

use crate::config::Color;
use crate::render::draw::blend_pixel;

/// Text rasterizer: a TrueType face, or the embedded 8x8 bitmap font when none could be loaded.
pub enum Typeface {
    Vector(Font),
    Builtin,
}

impl std::fmt::Debug for Typeface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Typeface::Vector(_) => f.write_str("Typeface::Vector"),
            Typeface::Builtin => f.write_str("Typeface::Builtin"),
        }
    }
}

impl Typeface {
    /// Loads a TTF/OTF file. Missing or unparsable files yield `None`.
    pub fn from_file(path: &Path) -> Option<Self> {
        let bytes = std::fs::read(path).ok()?;
        Self::from_bytes(bytes)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Option<Self> {
        Font::from_bytes(bytes, FontSettings::default())
            .ok()
            .map(Typeface::Vector)
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self, Typeface::Builtin)
    }

    /// Width and line height of `text` at `px`, in whole pixels.
    pub fn measure(&self, text: &str, px: f32) -> (u32, u32) {
        match self {
            Typeface::Vector(font) => {
                let width: f32 = text
                    .chars()
                    .map(|c| font.metrics(c, px).advance_width)
                    .sum();
                let height = font
                    .horizontal_line_metrics(px)
                    .map(|m| m.ascent - m.descent)
                    .unwrap_or(px);
                (width.ceil().max(0.0) as u32, height.ceil().max(1.0) as u32)
            }
            Typeface::Builtin => {
                let cell = 8 * builtin_scale(px);
                (cell * text.chars().count() as u32, cell)
            }
        }
    }

    /// Draws `text` with its line box's top-left corner at `(x, y)`. Clipped to the image.
    pub fn draw(&self, img: &mut RgbaImage, x: i32, y: i32, text: &str, px: f32, color: Color) {
        match self {
            Typeface::Vector(font) => {
                let ascent = font
                    .horizontal_line_metrics(px)
                    .map(|m| m.ascent)
                    .unwrap_or(px);
                let baseline = y + ascent.round() as i32;
                let mut pen = x as f32;
                for c in text.chars() {
                    let (metrics, coverage) = font.rasterize(c, px);
                    let gx = pen.round() as i32 + metrics.xmin;
                    let gy = baseline - metrics.height as i32 - metrics.ymin;
                    for row in 0..metrics.height {
                        for col in 0..metrics.width {
                            let cov = coverage[row * metrics.width + col];
                            if cov == 0 {
                                continue;
                            }
                            put(img, gx + col as i32, gy + row as i32, color, cov as f32 / 255.0);
                        }
                    }
                    pen += metrics.advance_width;
                }
            }
            Typeface::Builtin => {
                let scale = builtin_scale(px) as i32;
                let mut pen = x;
                for c in text.chars() {
                    let glyph = BASIC_FONTS
                        .get(c)
                        .or_else(|| LATIN_FONTS.get(c))
                        .or_else(|| BASIC_FONTS.get('?'))
                        .unwrap_or([0; 8]);
                    for (row, bits) in glyph.iter().enumerate() {
                        for bit in 0..8 {
                            if (*bits >> bit) & 1 == 0 {
                                continue;
                            }
                            let ox = pen + bit * scale;
                            let oy = y + row as i32 * scale;
                            for dy in 0..scale {
                                for dx in 0..scale {
                                    put(img, ox + dx, oy + dy, color, 1.0);
                                }
                            }
                        }
                    }
                    pen += 8 * scale;
                }
            }
        }
    }
}

// Cells are sized to roughly the advance of a proportional face at the same size.
fn builtin_scale(px: f32) -> u32 {
    ((px * 0.6 / 8.0).round() as u32).max(1)
}

fn put(img: &mut RgbaImage, x: i32, y: i32, color: Color, coverage: f32) {
    if x < 0 || y < 0 || x >= img.width() as i32 || y >= img.height() as i32 {
        return;
    }
    blend_pixel(img.get_pixel_mut(x as u32, y as u32), color.0, coverage);
}
