//! ArcFace face descriptor net via ONNX Runtime.
//!
//! Extracts 512-dimensional descriptors from faces aligned to the canonical
//! 112×112 position.

use crate::alignment::{self, ALIGNED_SIZE};
use crate::detector::{open_session, DetectorError, ModelLoadError};
use crate::types::{Descriptor, Point};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // symmetric, unlike SCRFD's 128.0
const ARCFACE_DESCRIPTOR_DIM: usize = 512;
const ARCFACE_MODEL_VERSION: &str = "w600k_mbf";
const ARCFACE_MODEL: &str = "descriptor";

pub(crate) struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    pub(crate) fn load(path: &Path) -> Result<Self, ModelLoadError> {
        let session = open_session(ARCFACE_MODEL, path)?;
        Ok(Self { session })
    }

    /// Extract an L2-normalized descriptor for the face at `keypoints`.
    pub(crate) fn extract(
        &mut self,
        image: &RgbImage,
        keypoints: &[Point; 5],
    ) -> Result<Descriptor, DetectorError> {
        let aligned = alignment::align_face(image, keypoints);
        let input = preprocess(&aligned);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("descriptor extraction: {e}")))?;

        if raw.len() != ARCFACE_DESCRIPTOR_DIM {
            return Err(DetectorError::InferenceFailed(format!(
                "expected {ARCFACE_DESCRIPTOR_DIM}-dim descriptor, got {}",
                raw.len()
            )));
        }

        Ok(Descriptor {
            values: l2_normalize(raw),
            model_version: Some(ARCFACE_MODEL_VERSION.to_string()),
        })
    }
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw.to_vec()
    }
}

/// 112×112 RGB crop → NCHW float tensor.
fn preprocess(aligned: &RgbImage) -> Array4<f32> {
    let size = ALIGNED_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in aligned.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel.0[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        }
    }
    tensor
}
