//! In-memory fakes for daemon tests.

use async_trait::async_trait;
use facegate_core::{
    CaptureError, CaptureSource, Detections, DetectorError, EncodedImage, Event, FaceDetector,
    FaceRegion, Frame, ModelLoadError, Notification, Notifier, Rect, Recognition, Size,
    StreamInfo, UploadError, UploadSink,
};
use image::{Rgb, RgbImage};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use tokio::sync::Notify;
use tokio::time::Instant;

pub fn solid_frame(size: Size) -> Frame {
    Frame::from_image(
        RgbImage::from_pixel(size.width, size.height, Rgb([120, 110, 100])),
        0,
    )
}

/// Lets a test hold a detection open until it calls [`Hold::release`].
pub struct Hold {
    pub entered: Arc<Notify>,
    release: mpsc::Sender<()>,
}

impl Hold {
    pub fn release(&self) {
        let _ = self.release.send(());
    }
}

pub struct FakeDetector {
    space: Size,
    regions: Vec<Rect>,
    fail_load: bool,
    loaded: bool,
    calls: Arc<AtomicUsize>,
    hold: Option<(Arc<Notify>, mpsc::Receiver<()>)>,
}

impl FakeDetector {
    pub fn new(space: Size, regions: Vec<Rect>) -> Self {
        Self {
            space,
            regions,
            fail_load: false,
            loaded: false,
            calls: Arc::new(AtomicUsize::new(0)),
            hold: None,
        }
    }

    pub fn failing_load(mut self) -> Self {
        self.fail_load = true;
        self
    }

    /// Block every `detect` until the returned [`Hold`] is released.
    pub fn held(mut self) -> (Self, Hold) {
        let entered = Arc::new(Notify::new());
        let (tx, rx) = mpsc::channel();
        self.hold = Some((entered.clone(), rx));
        (
            self,
            Hold {
                entered,
                release: tx,
            },
        )
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl FaceDetector for FakeDetector {
    fn load(&mut self) -> Result<(), ModelLoadError> {
        if self.fail_load {
            return Err(ModelLoadError::NotFound(PathBuf::from(
                "models/det_500m.onnx",
            )));
        }
        self.loaded = true;
        Ok(())
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Detections, DetectorError> {
        if !self.loaded {
            return Err(DetectorError::NotLoaded);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((entered, release)) = &self.hold {
            entered.notify_one();
            let _ = release.recv();
        }
        let regions = self
            .regions
            .iter()
            .map(|r| FaceRegion::new(*r, 0.9))
            .collect();
        Ok(Detections::new(self.space, regions))
    }
}

pub struct FakeCapture {
    size: Size,
    deny: bool,
    started: bool,
    frames_taken: Arc<AtomicU32>,
    released: Arc<AtomicBool>,
}

impl FakeCapture {
    pub fn new(size: Size) -> Self {
        Self {
            size,
            deny: false,
            started: false,
            frames_taken: Arc::new(AtomicU32::new(0)),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn denied() -> Self {
        let mut capture = Self::new(Size::new(640, 480));
        capture.deny = true;
        capture
    }

    pub fn frames_taken(&self) -> Arc<AtomicU32> {
        self.frames_taken.clone()
    }

    pub fn released(&self) -> Arc<AtomicBool> {
        self.released.clone()
    }
}

impl CaptureSource for FakeCapture {
    fn start(&mut self) -> Result<StreamInfo, CaptureError> {
        if self.deny {
            return Err(CaptureError::PermissionDenied("/dev/video0".into()));
        }
        self.started = true;
        Ok(StreamInfo { size: self.size })
    }

    fn current_frame(&mut self) -> Result<Frame, CaptureError> {
        if !self.started {
            return Err(CaptureError::NotStarted);
        }
        let sequence = self.frames_taken.fetch_add(1, Ordering::SeqCst);
        let mut frame = solid_frame(self.size);
        frame.sequence = sequence;
        Ok(frame)
    }
}

impl Drop for FakeCapture {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

enum SinkBehavior {
    Recognize(String),
    Fail(u16),
    Hang,
}

pub struct RecordingSink {
    behavior: SinkBehavior,
    uploads: Mutex<Vec<(Instant, u32, u32)>>,
}

impl RecordingSink {
    fn with(behavior: SinkBehavior) -> Self {
        Self {
            behavior,
            uploads: Mutex::new(Vec::new()),
        }
    }

    pub fn recognizing(name: &str) -> Self {
        Self::with(SinkBehavior::Recognize(name.to_string()))
    }

    pub fn failing(status: u16) -> Self {
        Self::with(SinkBehavior::Fail(status))
    }

    /// Never settles on its own.
    pub fn hanging() -> Self {
        Self::with(SinkBehavior::Hang)
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }

    pub fn upload_times(&self) -> Vec<Instant> {
        self.uploads.lock().unwrap().iter().map(|u| u.0).collect()
    }

    pub fn uploaded_sizes(&self) -> Vec<(u32, u32)> {
        self.uploads
            .lock()
            .unwrap()
            .iter()
            .map(|u| (u.1, u.2))
            .collect()
    }
}

#[async_trait]
impl UploadSink for RecordingSink {
    async fn upload(&self, image: EncodedImage) -> Result<Recognition, UploadError> {
        assert_eq!(&image.bytes[..2], &[0xFF, 0xD8]);
        self.uploads
            .lock()
            .unwrap()
            .push((Instant::now(), image.width, image.height));

        match &self.behavior {
            SinkBehavior::Recognize(name) => Ok(Recognition {
                name: name.clone(),
                confidence: Some(0.9),
            }),
            SinkBehavior::Fail(status) => Err(UploadError::Status {
                status: *status,
                body: "unavailable".into(),
            }),
            SinkBehavior::Hang => std::future::pending().await,
        }
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<Event>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.events.lock().unwrap().push(notification.event);
    }
}
