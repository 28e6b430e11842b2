//! RGB drawing buffer used to render surfaces for screenshot steps.
//!
//! Provides a small drawing API:
//! - `fill()` - Fill entire buffer with a color
//! - `draw_rect()` - Draw a filled rectangle
//! - `draw_text()` / `draw_text_scaled()` - Draw text using font8x8 glyphs
//! - `get_pixel()` / `set_pixel()` - Direct pixel access

use font8x8::{BASIC_FONTS, BLOCK_FONTS, BOX_FONTS, LATIN_FONTS, UnicodeFonts};
use image::{ImageBuffer, RgbImage};
use std::io::Cursor;

use super::{CaptureResult, SurfaceError, SurfaceResult};

/// Glyph edge length in pixels before scaling
pub const GLYPH_SIZE: u32 = 8;

#[derive(Debug, Clone)]
pub struct Framebuffer {
    width: u32,
    height: u32,
    /// RGB pixel buffer (row-major, 3 bytes per pixel)
    buffer: Vec<u8>,
}

impl Framebuffer {
    /// Create a new framebuffer with the given dimensions, initialized to black
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            buffer: vec![0u8; (width * height * 3) as usize],
        }
    }

    /// Create a framebuffer initialized to a specific color
    pub fn with_color(width: u32, height: u32, color: [u8; 3]) -> Self {
        let mut fb = Self::new(width, height);
        fb.fill(color);
        fb
    }

    /// Load a framebuffer from PNG image bytes
    pub fn from_png_bytes(data: &[u8]) -> SurfaceResult<Self> {
        let img = image::load_from_memory(data)
            .map_err(|e| SurfaceError::Capture(format!("Failed to load PNG: {}", e)))?;
        let rgb = img.to_rgb8();
        Ok(Self {
            width: rgb.width(),
            height: rgb.height(),
            buffer: rgb.into_raw(),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn fill(&mut self, color: [u8; 3]) {
        for chunk in self.buffer.chunks_exact_mut(3) {
            chunk.copy_from_slice(&color);
        }
    }

    /// Draw a filled rectangle, clipped to the buffer
    pub fn draw_rect(&mut self, x: u32, y: u32, w: u32, h: u32, color: [u8; 3]) {
        for py in y..(y + h).min(self.height) {
            for px in x..(x + w).min(self.width) {
                self.set_pixel(px, py, color);
            }
        }
    }

    /// Draw text at 1:1 scale. Each character is 8x8 pixels; text does not wrap.
    pub fn draw_text(&mut self, x: u32, y: u32, text: &str, fg: [u8; 3], bg: [u8; 3]) {
        self.draw_text_scaled(x, y, text, fg, bg, 1);
    }

    /// Draw text with every glyph pixel blown up to `scale`x`scale`
    pub fn draw_text_scaled(
        &mut self,
        x: u32,
        y: u32,
        text: &str,
        fg: [u8; 3],
        bg: [u8; 3],
        scale: u32,
    ) {
        let scale = scale.max(1);
        let advance = GLYPH_SIZE * scale;
        let mut cursor_x = x;
        for ch in text.chars() {
            if cursor_x >= self.width {
                break;
            }
            self.draw_char(cursor_x, y, ch, fg, bg, scale);
            cursor_x += advance;
        }
    }

    fn draw_char(&mut self, x: u32, y: u32, ch: char, fg: [u8; 3], bg: [u8; 3], scale: u32) {
        let glyph = glyph_for(ch);
        for (row_idx, row) in glyph.iter().enumerate() {
            for bit in 0..GLYPH_SIZE {
                // font8x8 stores the leftmost pixel in the least significant bit
                let color = if (row >> bit) & 1 == 1 { fg } else { bg };
                self.draw_rect(x + bit * scale, y + row_idx as u32 * scale, scale, scale, color);
            }
        }
    }

    /// Color of a pixel; black outside the buffer
    pub fn get_pixel(&self, x: u32, y: u32) -> [u8; 3] {
        if x >= self.width || y >= self.height {
            return [0, 0, 0];
        }
        let idx = ((y * self.width + x) * 3) as usize;
        [self.buffer[idx], self.buffer[idx + 1], self.buffer[idx + 2]]
    }

    /// Set a pixel; writes outside the buffer are ignored
    pub fn set_pixel(&mut self, x: u32, y: u32, color: [u8; 3]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = ((y * self.width + x) * 3) as usize;
        self.buffer[idx..idx + 3].copy_from_slice(&color);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn to_image(&self) -> SurfaceResult<RgbImage> {
        ImageBuffer::from_raw(self.width, self.height, self.buffer.clone())
            .ok_or_else(|| SurfaceError::Capture("Buffer size does not match dimensions".to_string()))
    }

    /// Encode the framebuffer as PNG bytes
    pub fn to_png(&self) -> SurfaceResult<Vec<u8>> {
        let img = self.to_image()?;
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .map_err(|e| SurfaceError::Capture(format!("Failed to encode PNG: {}", e)))?;
        Ok(bytes)
    }

    /// Encode and wrap as a screenshot result
    pub fn capture(&self) -> SurfaceResult<CaptureResult> {
        Ok(CaptureResult {
            image_data: self.to_png()?,
            width: self.width,
            height: self.height,
        })
    }
}

fn glyph_for(ch: char) -> [u8; 8] {
    BASIC_FONTS
        .get(ch)
        .or_else(|| LATIN_FONTS.get(ch))
        .or_else(|| BOX_FONTS.get(ch))
        .or_else(|| BLOCK_FONTS.get(ch))
        .unwrap_or([0u8; 8])
}
