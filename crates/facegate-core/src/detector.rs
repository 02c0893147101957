//! Pluggable face detection.
//!
//! [`FaceDetector`] is the seam the daemon drives: `load` once, then
//! `detect` per frame. [`OnnxFaceDetector`] is the production backend and
//! chains three ONNX sub-models: SCRFD for boxes and keypoints, a 106-point
//! landmark estimator, and an ArcFace descriptor net.

use crate::frame::Frame;
use crate::landmarks::LandmarkEstimator;
use crate::recognizer::FaceRecognizer;
use crate::scrfd::Scrfd;
use crate::types::{Detections, Size};
use image::imageops::{self, FilterType};
use ort::session::Session;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Fast face detector (SCRFD 500M).
pub const DETECTOR_MODEL_FILE: &str = "det_500m.onnx";
/// 106-point 2D landmark estimator.
pub const LANDMARK_MODEL_FILE: &str = "2d106det.onnx";
/// ArcFace MobileFaceNet descriptor net.
pub const DESCRIPTOR_MODEL_FILE: &str = "w600k_mbf.onnx";

/// Accuracy/speed profile for detection. One profile is chosen for the
/// whole system; it is not tuned per call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorOptions {
    /// Long side of the working image, in pixels. Multiple of 32.
    pub input_size: u32,
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl DetectorOptions {
    /// Small, fast profile for a live kiosk feed.
    pub const TINY: Self = Self {
        input_size: 416,
        score_threshold: 0.5,
        nms_threshold: 0.4,
    };
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self::TINY
    }
}

#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("model file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to load {model} model from {path}: {source}")]
    Ort {
        model: &'static str,
        path: PathBuf,
        #[source]
        source: ort::Error,
    },
    #[error("invalid {model} model: {reason}")]
    Invalid { model: &'static str, reason: String },
}

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector models are not loaded")]
    NotLoaded,
    #[error("cannot run detection on an empty {0} frame")]
    EmptyFrame(Size),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A face-detection capability.
///
/// `load` must succeed before `detect` is called. Both are blocking; callers
/// on an async runtime should run them on a blocking thread.
pub trait FaceDetector: Send {
    /// Load every required sub-model.
    fn load(&mut self) -> Result<(), ModelLoadError>;

    /// Detect faces in `frame`. Regions are in the coordinate space reported
    /// by [`Detections::space`].
    fn detect(&mut self, frame: &Frame) -> Result<Detections, DetectorError>;
}

/// Default model directory, relative to the working directory.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("models")
}

/// Paths of the three sub-models.
#[derive(Debug, Clone)]
pub struct ModelSet {
    pub detector: PathBuf,
    pub landmarks: PathBuf,
    pub descriptor: PathBuf,
}

impl ModelSet {
    /// Standard file names inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            detector: dir.join(DETECTOR_MODEL_FILE),
            landmarks: dir.join(LANDMARK_MODEL_FILE),
            descriptor: dir.join(DESCRIPTOR_MODEL_FILE),
        }
    }
}

/// Open an ONNX session, mapping failures to [`ModelLoadError`].
pub(crate) fn open_session(model: &'static str, path: &Path) -> Result<Session, ModelLoadError> {
    if !path.exists() {
        return Err(ModelLoadError::NotFound(path.to_path_buf()));
    }

    let build = || -> ort::Result<Session> {
        Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(path)
    };

    let session = build().map_err(|source| ModelLoadError::Ort {
        model,
        path: path.to_path_buf(),
        source,
    })?;

    tracing::info!(
        model,
        path = %path.display(),
        inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
        outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
        "loaded ONNX model"
    );

    Ok(session)
}

struct LoadedModels {
    scrfd: Scrfd,
    landmarks: LandmarkEstimator,
    recognizer: FaceRecognizer,
}

/// SCRFD + landmark + ArcFace detector over ONNX Runtime.
pub struct OnnxFaceDetector {
    models: ModelSet,
    options: DetectorOptions,
    loaded: Option<LoadedModels>,
}

impl OnnxFaceDetector {
    pub fn new(models: ModelSet) -> Self {
        Self {
            models,
            options: DetectorOptions::TINY,
            loaded: None,
        }
    }
}

impl FaceDetector for OnnxFaceDetector {
    fn load(&mut self) -> Result<(), ModelLoadError> {
        if self.loaded.is_some() {
            return Ok(());
        }

        let scrfd = Scrfd::load(&self.models.detector)?;
        let landmarks = LandmarkEstimator::load(&self.models.landmarks)?;
        let recognizer = FaceRecognizer::load(&self.models.descriptor)?;

        self.loaded = Some(LoadedModels {
            scrfd,
            landmarks,
            recognizer,
        });
        Ok(())
    }

    fn detect(&mut self, frame: &Frame) -> Result<Detections, DetectorError> {
        let models = self.loaded.as_mut().ok_or(DetectorError::NotLoaded)?;
        if frame.size().is_empty() {
            return Err(DetectorError::EmptyFrame(frame.size()));
        }

        let space = working_size(frame.size(), self.options.input_size);
        let working = imageops::resize(frame.image(), space.width, space.height, FilterType::Triangle);

        let mut regions = models.scrfd.detect(&working, &self.options)?;
        for region in &mut regions {
            region.landmarks = Some(models.landmarks.estimate(&working, &region.bounds)?);
            if let Some(keypoints) = &region.keypoints {
                region.descriptor = Some(models.recognizer.extract(&working, keypoints)?);
            }
        }

        tracing::debug!(
            faces = regions.len(),
            space = %space,
            sequence = frame.sequence,
            "detection complete"
        );

        Ok(Detections::new(space, regions))
    }
}

/// Aspect-preserving size whose long side equals `input_size`.
fn working_size(frame: Size, input_size: u32) -> Size {
    let long = frame.width.max(frame.height).max(1) as f32;
    let scale = input_size as f32 / long;
    Size::new(
        ((frame.width as f32 * scale).round() as u32).max(1),
        ((frame.height as f32 * scale).round() as u32).max(1),
    )
}
