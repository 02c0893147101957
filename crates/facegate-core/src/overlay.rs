//! Detection overlay drawn over the live video.

use crate::types::{FaceRegion, Size};
use image::{Rgba, RgbaImage};
use imageproc::drawing::draw_hollow_rect_mut;

pub const STROKE_COLOR: Rgba<u8> = Rgba([0, 255, 0, 255]);
pub const LINE_WIDTH: u32 = 2;

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Transparent RGBA canvas sized to the display, one rectangle per face.
pub struct Overlay {
    canvas: RgbaImage,
}

impl Overlay {
    pub fn new(size: Size) -> Self {
        Self {
            canvas: RgbaImage::new(size.width, size.height),
        }
    }

    pub fn size(&self) -> Size {
        Size::new(self.canvas.width(), self.canvas.height())
    }

    /// Resize the canvas to exactly `size`, discarding any drawing.
    pub fn match_dimensions(&mut self, size: Size) {
        if self.size() != size {
            self.canvas = RgbaImage::new(size.width, size.height);
        } else {
            self.clear();
        }
    }

    pub fn clear(&mut self) {
        self.canvas.pixels_mut().for_each(|p| *p = TRANSPARENT);
    }

    /// Clear the previous drawing and stroke one rectangle per region.
    /// Regions must already be in display coordinates.
    pub fn draw(&mut self, regions: &[FaceRegion]) {
        self.clear();
        for region in regions {
            let b = &region.bounds;
            if !(b.x.is_finite() && b.y.is_finite()) {
                continue;
            }
            // Bound to the canvas scale so the integer casts cannot overflow.
            let (cw, ch) = (self.canvas.width() as f32, self.canvas.height() as f32);
            let x = b.x.round().clamp(-cw, cw) as i32;
            let y = b.y.round().clamp(-ch, ch) as i32;
            let (w, h) = (b.width.round().min(2.0 * cw), b.height.round().min(2.0 * ch));
            if !(w >= 1.0 && h >= 1.0) {
                continue;
            }
            // Grow outward one pixel per unit of line width.
            for i in 0..LINE_WIDTH {
                let rect = imageproc::rect::Rect::at(x - i as i32, y - i as i32)
                    .of_size(w as u32 + 2 * i, h as u32 + 2 * i);
                draw_hollow_rect_mut(&mut self.canvas, rect, STROKE_COLOR);
            }
        }
    }

    pub fn canvas(&self) -> &RgbaImage {
        &self.canvas
    }
}
