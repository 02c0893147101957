//! Raw V4L2 buffer → RGB conversion.

use image::{ImageFormat, RgbImage};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("invalid {format} length: expected {expected}, got {actual}")]
    InvalidLength {
        format: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("MJPG decode failed: {0}")]
    Mjpeg(#[from] image::ImageError),
}

/// Convert packed YUYV (4:2:2) to RGB using BT.601 limited-range coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U/V.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, ConvertError> {
    let expected = width as usize * height as usize * 2;
    if yuyv.len() < expected {
        return Err(ConvertError::InvalidLength {
            format: "YUYV",
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v));
    }

    image_from_raw(rgb, width, height, "YUYV")
}

fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clip = |x: i32| (x >> 8).clamp(0, 255) as u8;
    [
        clip(298 * c + 409 * e + 128),
        clip(298 * c - 100 * d - 208 * e + 128),
        clip(298 * c + 516 * d + 128),
    ]
}

/// Expand 8-bit grayscale to RGB.
pub fn grey_to_rgb(grey: &[u8], width: u32, height: u32) -> Result<RgbImage, ConvertError> {
    let expected = width as usize * height as usize;
    if grey.len() < expected {
        return Err(ConvertError::InvalidLength {
            format: "GREY",
            expected,
            actual: grey.len(),
        });
    }
    let rgb = grey[..expected].iter().flat_map(|&g| [g, g, g]).collect();
    image_from_raw(rgb, width, height, "GREY")
}

/// Decode one Motion-JPEG buffer.
pub fn mjpeg_to_rgb(buf: &[u8]) -> Result<RgbImage, ConvertError> {
    Ok(image::load_from_memory_with_format(buf, ImageFormat::Jpeg)?.to_rgb8())
}

fn image_from_raw(
    rgb: Vec<u8>,
    width: u32,
    height: u32,
    format: &'static str,
) -> Result<RgbImage, ConvertError> {
    let actual = rgb.len();
    RgbImage::from_raw(width, height, rgb).ok_or(ConvertError::InvalidLength {
        format,
        expected: width as usize * height as usize * 3,
        actual,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_black_and_white() {
        // 2x1: Y0=16 (black), Y1=235 (white), neutral chroma
        let yuyv = vec![16, 128, 235, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(rgb.get_pixel(1, 0).0, [255, 255, 255]);
    }

    #[test]
    fn test_yuyv_mid_grey() {
        let yuyv = vec![126, 128, 126, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb.get_pixel(0, 0).0, [128, 128, 128]);
    }

    #[test]
    fn test_yuyv_red_chroma() {
        // High V pushes red up and green down
        let yuyv = vec![81, 90, 81, 240];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        let [r, g, b] = rgb.get_pixel(0, 0).0;
        assert!(r > 200, "r = {r}");
        assert!(g < 60, "g = {g}");
        assert!(b < 60, "b = {b}");
    }

    #[test]
    fn test_yuyv_4x2_dimensions() {
        let yuyv = vec![128u8; 16];
        let rgb = yuyv_to_rgb(&yuyv, 4, 2).unwrap();
        assert_eq!(rgb.dimensions(), (4, 2));
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let result = yuyv_to_rgb(&[100, 128], 2, 1);
        assert!(matches!(
            result,
            Err(ConvertError::InvalidLength {
                format: "YUYV",
                expected: 4,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_grey_to_rgb() {
        let rgb = grey_to_rgb(&[7, 200], 2, 1).unwrap();
        assert_eq!(rgb.get_pixel(0, 0).0, [7, 7, 7]);
        assert_eq!(rgb.get_pixel(1, 0).0, [200, 200, 200]);
        assert!(grey_to_rgb(&[1], 2, 1).is_err());
    }

    #[test]
    fn test_mjpeg_roundtrip_dimensions() {
        let source = RgbImage::from_pixel(16, 8, image::Rgb([90, 120, 200]));
        let mut jpeg = Vec::new();
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 90)
            .encode_image(&source)
            .unwrap();

        let decoded = mjpeg_to_rgb(&jpeg).unwrap();
        assert_eq!(decoded.dimensions(), (16, 8));
    }

    #[test]
    fn test_mjpeg_garbage_is_error() {
        assert!(matches!(
            mjpeg_to_rgb(&[0, 1, 2, 3]),
            Err(ConvertError::Mjpeg(_))
        ));
    }
}
