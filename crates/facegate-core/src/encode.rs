//! Face crop and JPEG encoding for recognition uploads.

use crate::frame::Frame;
use crate::types::Rect;
use image::codecs::jpeg::JpegEncoder;
use image::imageops;
use image::RgbImage;
use thiserror::Error;

/// JPEG quality used for face uploads (0–100).
pub const JPEG_QUALITY: u8 = 90;
/// File name attached to every uploaded face image.
pub const UPLOAD_FILENAME: &str = "face-image.jpg";
pub const UPLOAD_MIME: &str = "image/jpeg";

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("face region {width}x{height} at ({x}, {y}) is empty after clipping to {frame_width}x{frame_height}")]
    EmptyRegion {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        frame_width: u32,
        frame_height: u32,
    },
    #[error("JPEG quality must be in 1..=100, got {0}")]
    InvalidQuality(u8),
    #[error("JPEG encoding failed: {0}")]
    Jpeg(#[from] image::ImageError),
}

/// A compressed face image ready for upload.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl EncodedImage {
    pub fn filename(&self) -> &'static str {
        UPLOAD_FILENAME
    }

    pub fn mime(&self) -> &'static str {
        UPLOAD_MIME
    }
}

/// Copy the pixels under `rect` out of `frame`, clipped to the frame bounds.
///
/// Edges are rounded to the nearest pixel. A region with no pixels left
/// after clipping is an [`EncodeError::EmptyRegion`].
pub fn crop(frame: &Frame, rect: &Rect) -> Result<RgbImage, EncodeError> {
    let empty = || EncodeError::EmptyRegion {
        x: rect.x,
        y: rect.y,
        width: rect.width,
        height: rect.height,
        frame_width: frame.width(),
        frame_height: frame.height(),
    };

    // Also rejects NaN dimensions.
    if !(rect.width > 0.0 && rect.height > 0.0) {
        return Err(empty());
    }

    let x0 = rect.x.round().clamp(0.0, frame.width() as f32) as u32;
    let y0 = rect.y.round().clamp(0.0, frame.height() as f32) as u32;
    let x1 = (rect.x + rect.width).round().clamp(0.0, frame.width() as f32) as u32;
    let y1 = (rect.y + rect.height).round().clamp(0.0, frame.height() as f32) as u32;

    if x1 <= x0 || y1 <= y0 {
        return Err(empty());
    }

    Ok(imageops::crop_imm(frame.image(), x0, y0, x1 - x0, y1 - y0).to_image())
}

/// Encode an RGB image as baseline JPEG.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<EncodedImage, EncodeError> {
    if quality == 0 || quality > 100 {
        return Err(EncodeError::InvalidQuality(quality));
    }
    if image.width() == 0 || image.height() == 0 {
        return Err(EncodeError::EmptyRegion {
            x: 0.0,
            y: 0.0,
            width: image.width() as f32,
            height: image.height() as f32,
            frame_width: image.width(),
            frame_height: image.height(),
        });
    }

    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality).encode_image(image)?;

    Ok(EncodedImage {
        bytes,
        width: image.width(),
        height: image.height(),
    })
}
