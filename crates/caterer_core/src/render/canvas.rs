//! RGB canvas for one frame.

use crate::color::Rgb;
use image::{Rgba, RgbaImage};

/// Row-major grid of RGB pixels, one per cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canvas {
    pub width: usize,
    pub height: usize,
    pixels: Vec<Rgb>,
}

impl Canvas {
    /// Create a canvas filled with one color.
    pub fn filled(width: usize, height: usize, color: Rgb) -> Self {
        Self {
            width,
            height,
            pixels: vec![color; width * height],
        }
    }

    /// Reset every pixel to `color`.
    pub fn fill(&mut self, color: Rgb) {
        self.pixels.fill(color);
    }

    /// Color at (x, y), or `None` outside the canvas.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> Option<Rgb> {
        (x < self.width && y < self.height).then(|| self.pixels[y * self.width + x])
    }

    /// Write a row of colors starting at (x, y). Pixels past the edges are
    /// dropped; negative offsets clip the start of the row.
    pub fn blit_row<I>(&mut self, x: i64, y: i64, colors: I)
    where
        I: IntoIterator<Item = Rgb>,
    {
        if y < 0 || y >= self.height as i64 {
            return;
        }
        let row = y as usize * self.width;
        for (dx, color) in colors.into_iter().enumerate() {
            let cx = x + dx as i64;
            if cx >= self.width as i64 {
                break;
            }
            if cx >= 0 {
                self.pixels[row + cx as usize] = color;
            }
        }
    }

    /// Nearest-neighbor upscale by `factor` on both axes.
    pub fn to_image(&self, factor: u32) -> RgbaImage {
        let factor = factor.max(1);
        let width = self.width as u32 * factor;
        let height = self.height as u32 * factor;
        RgbaImage::from_fn(width, height, |x, y| {
            let [r, g, b] = self.pixels[(y / factor) as usize * self.width + (x / factor) as usize];
            Rgba([r, g, b, 255])
        })
    }
}
