//! Captured camera frame.

use crate::types::Size;
use image::{ImageBuffer, Rgb, RgbImage};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid RGB length for {width}x{height}: expected {expected}, got {actual}")]
    InvalidLength {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

/// An immutable RGB8 snapshot of the camera stream.
#[derive(Clone)]
pub struct Frame {
    image: RgbImage,
    pub sequence: u32,
}

impl Frame {
    /// Wrap packed RGB8 pixel data (`width * height * 3` bytes).
    pub fn from_rgb(
        data: Vec<u8>,
        width: u32,
        height: u32,
        sequence: u32,
    ) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * 3;
        let actual = data.len();
        let image = ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, data)
            .filter(|_| actual == expected)
            .ok_or(FrameError::InvalidLength {
                width,
                height,
                expected,
                actual,
            })?;
        Ok(Self::from_image(image, sequence))
    }

    pub fn from_image(image: RgbImage, sequence: u32) -> Self {
        Self {
            image,
            sequence,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn size(&self) -> Size {
        Size::new(self.image.width(), self.image.height())
    }

    /// Raw packed RGB8 bytes.
    pub fn data(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Average luma (0.0–255.0), BT.601 weights.
    pub fn avg_brightness(&self) -> f32 {
        let data = self.data();
        if data.is_empty() {
            return 0.0;
        }
        let sum: f32 = data
            .chunks_exact(3)
            .map(|px| 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32)
            .sum();
        sum / (data.len() / 3) as f32
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}
