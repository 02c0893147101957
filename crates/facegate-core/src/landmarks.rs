//! 106-point 2D facial landmark estimator via ONNX Runtime.
//!
//! Runs the InsightFace `2d106det` net on a 192×192 crop centered on a
//! detected face and maps the predicted points back into image space.

use crate::alignment::{centered_square, invert_point, warp_similarity};
use crate::detector::{open_session, DetectorError, ModelLoadError};
use crate::types::{Point, Rect};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const LANDMARK_INPUT_SIZE: u32 = 192;
/// Crop side relative to the long side of the face box.
const LANDMARK_CROP_EXPAND: f32 = 1.5;
// 2d106det normalizes inside the graph; feed raw 0–255 RGB.
const LANDMARK_MEAN: f32 = 0.0;
const LANDMARK_STD: f32 = 1.0;
const LANDMARK_POINTS: usize = 106;
const LANDMARK_MODEL: &str = "landmark";

pub(crate) struct LandmarkEstimator {
    session: Session,
}

impl LandmarkEstimator {
    pub(crate) fn load(path: &Path) -> Result<Self, ModelLoadError> {
        let session = open_session(LANDMARK_MODEL, path)?;
        if session.outputs().is_empty() {
            return Err(ModelLoadError::Invalid {
                model: LANDMARK_MODEL,
                reason: "model has no outputs".into(),
            });
        }
        Ok(Self { session })
    }

    /// Estimate landmarks for the face inside `bounds`.
    pub(crate) fn estimate(
        &mut self,
        image: &RgbImage,
        bounds: &Rect,
    ) -> Result<Vec<Point>, DetectorError> {
        let matrix = centered_square(bounds, LANDMARK_CROP_EXPAND, LANDMARK_INPUT_SIZE);
        let crop = warp_similarity(image, &matrix, LANDMARK_INPUT_SIZE);
        let input = preprocess(&crop);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("landmark extraction: {e}")))?;

        let points = decode(raw)?;
        Ok(points
            .into_iter()
            .map(|p| invert_point(&matrix, p))
            .collect())
    }
}

fn preprocess(crop: &RgbImage) -> Array4<f32> {
    let size = LANDMARK_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in crop.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] =
                (pixel.0[c] as f32 - LANDMARK_MEAN) / LANDMARK_STD;
        }
    }
    tensor
}

/// Convert raw `[-1, 1]` predictions into crop-space pixel coordinates.
fn decode(raw: &[f32]) -> Result<Vec<Point>, DetectorError> {
    if raw.len() < LANDMARK_POINTS * 2 {
        return Err(DetectorError::InferenceFailed(format!(
            "expected {} landmark values, got {}",
            LANDMARK_POINTS * 2,
            raw.len()
        )));
    }
    let half = LANDMARK_INPUT_SIZE as f32 / 2.0;
    Ok(raw[..LANDMARK_POINTS * 2]
        .chunks_exact(2)
        .map(|xy| ((xy[0] + 1.0) * half, (xy[1] + 1.0) * half))
        .collect())
}
