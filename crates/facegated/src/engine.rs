use facegate_core::{
    CaptureError, CaptureSource, Detections, DetectorError, FaceDetector, Frame, ModelLoadError,
    StreamInfo,
};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("model load failed: {0}")]
    ModelLoad(#[from] ModelLoadError),
    #[error("camera error: {0}")]
    Capture(#[from] CaptureError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("camera has been released")]
    CaptureReleased,
    #[error("engine lock poisoned by a panicked task")]
    Poisoned,
    #[error("engine task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

type SharedDetector = Arc<Mutex<Box<dyn FaceDetector>>>;
type SharedCapture = Arc<Mutex<Option<Box<dyn CaptureSource>>>>;

/// Clone-safe handle to the detector and camera.
///
/// Inference and V4L2 calls block, so every operation runs on the blocking
/// pool. The detector and the camera sit behind separate locks: loading
/// models does not hold up starting the camera.
#[derive(Clone)]
pub struct EngineHandle {
    detector: SharedDetector,
    capture: SharedCapture,
}

impl EngineHandle {
    pub fn new(detector: Box<dyn FaceDetector>, capture: Box<dyn CaptureSource>) -> Self {
        Self {
            detector: Arc::new(Mutex::new(detector)),
            capture: Arc::new(Mutex::new(Some(capture))),
        }
    }

    /// Load every detector sub-model.
    pub async fn load_models(&self) -> Result<(), EngineError> {
        let detector = Arc::clone(&self.detector);
        tokio::task::spawn_blocking(move || -> Result<(), EngineError> {
            let mut detector = lock(&detector)?;
            detector.load()?;
            Ok(())
        })
        .await?
    }

    /// Start the camera and discard `warmup_frames` frames while
    /// auto-exposure settles.
    pub async fn start_capture(&self, warmup_frames: usize) -> Result<StreamInfo, EngineError> {
        let capture = Arc::clone(&self.capture);
        tokio::task::spawn_blocking(move || -> Result<StreamInfo, EngineError> {
            let mut guard = lock(&capture)?;
            let source = guard.as_mut().ok_or(EngineError::CaptureReleased)?;
            let info = source.start()?;
            tracing::info!(width = info.size.width, height = info.size.height, "camera started");

            if warmup_frames > 0 {
                tracing::info!(count = warmup_frames, "discarding warmup frames");
                for _ in 0..warmup_frames {
                    if let Err(e) = source.current_frame() {
                        tracing::debug!(error = %e, "warmup frame failed");
                    }
                }
            }
            Ok(info)
        })
        .await?
    }

    /// Grab the current frame and run the detector on it.
    pub async fn detect_current(&self) -> Result<(Frame, Detections), EngineError> {
        let capture = Arc::clone(&self.capture);
        let detector = Arc::clone(&self.detector);
        tokio::task::spawn_blocking(move || -> Result<(Frame, Detections), EngineError> {
            let frame = {
                let mut guard = lock(&capture)?;
                let source = guard.as_mut().ok_or(EngineError::CaptureReleased)?;
                source.current_frame()?
            };
            let detections = lock(&detector)?.detect(&frame)?;
            tracing::debug!(
                sequence = frame.sequence,
                faces = detections.len(),
                "detection complete"
            );
            Ok((frame, detections))
        })
        .await?
    }

    /// Drop the camera, releasing the device. Later captures fail with
    /// [`EngineError::CaptureReleased`].
    pub async fn release_capture(&self) {
        let capture = Arc::clone(&self.capture);
        let released = tokio::task::spawn_blocking(move || {
            let mut guard = capture
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            guard.take().is_some()
        })
        .await;

        match released {
            Ok(true) => tracing::info!("camera released"),
            Ok(false) => {}
            Err(e) => tracing::warn!(error = %e, "failed to release camera"),
        }
    }
}

fn lock<T: ?Sized>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>, EngineError> {
    m.lock().map_err(|_| EngineError::Poisoned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeCapture, FakeDetector};
    use facegate_core::{Rect, Size};

    #[tokio::test]
    async fn test_detect_requires_started_camera() {
        let engine = EngineHandle::new(
            Box::new(FakeDetector::new(Size::new(320, 240), vec![])),
            Box::new(FakeCapture::new(Size::new(640, 480))),
        );
        engine.load_models().await.unwrap();
        assert!(matches!(
            engine.detect_current().await,
            Err(EngineError::Capture(CaptureError::NotStarted))
        ));
    }

    #[tokio::test]
    async fn test_detect_before_load_fails() {
        let engine = EngineHandle::new(
            Box::new(FakeDetector::new(Size::new(320, 240), vec![])),
            Box::new(FakeCapture::new(Size::new(640, 480))),
        );
        engine.start_capture(0).await.unwrap();
        assert!(matches!(
            engine.detect_current().await,
            Err(EngineError::Detector(DetectorError::NotLoaded))
        ));
    }

    #[tokio::test]
    async fn test_start_discards_warmup_frames() {
        let capture = FakeCapture::new(Size::new(640, 480));
        let frames = capture.frames_taken();
        let engine = EngineHandle::new(
            Box::new(FakeDetector::new(Size::new(320, 240), vec![])),
            Box::new(capture),
        );

        let info = engine.start_capture(4).await.unwrap();
        assert_eq!(info.size, Size::new(640, 480));
        assert_eq!(frames.load(std::sync::atomic::Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_detect_current_returns_frame_and_regions() {
        let engine = EngineHandle::new(
            Box::new(FakeDetector::new(
                Size::new(320, 240),
                vec![Rect::new(10.0, 10.0, 50.0, 50.0)],
            )),
            Box::new(FakeCapture::new(Size::new(640, 480))),
        );
        engine.load_models().await.unwrap();
        engine.start_capture(0).await.unwrap();

        let (frame, detections) = engine.detect_current().await.unwrap();
        assert_eq!(frame.size(), Size::new(640, 480));
        assert_eq!(detections.space(), Size::new(320, 240));
        assert_eq!(detections.len(), 1);
    }

    #[tokio::test]
    async fn test_permission_denied_surfaces_as_capture_error() {
        let engine = EngineHandle::new(
            Box::new(FakeDetector::new(Size::new(320, 240), vec![])),
            Box::new(FakeCapture::denied()),
        );
        assert!(matches!(
            engine.start_capture(0).await,
            Err(EngineError::Capture(CaptureError::PermissionDenied(_)))
        ));
    }

    #[tokio::test]
    async fn test_release_drops_camera() {
        let capture = FakeCapture::new(Size::new(640, 480));
        let released = capture.released();
        let engine = EngineHandle::new(
            Box::new(FakeDetector::new(Size::new(320, 240), vec![])),
            Box::new(capture),
        );
        engine.start_capture(0).await.unwrap();

        engine.release_capture().await;
        assert!(released.load(std::sync::atomic::Ordering::SeqCst));
        assert!(matches!(
            engine.detect_current().await,
            Err(EngineError::CaptureReleased)
        ));
    }
}
