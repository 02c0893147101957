use facegate_core::encode::{self, JPEG_QUALITY};
use facegate_core::{
    Event, FaceRegion, Frame, Notification, Notifier, Rect, Size, UploadError, UploadSink,
};
use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Semaphore, TryAcquireError};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct GateOptions {
    pub jpeg_quality: u8,
    /// Deadline for one upload to settle.
    pub upload_timeout: Duration,
}

impl Default for GateOptions {
    fn default() -> Self {
        Self {
            jpeg_quality: JPEG_QUALITY,
            upload_timeout: Duration::from_secs(15),
        }
    }
}

/// Outcome of [`UploadGate::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Crop accepted; upload running under this attempt id.
    Dispatched(Uuid),
    /// Another upload is in flight; the region was dropped.
    Busy,
    /// The gate has been closed.
    Closed,
    /// The region could not be cropped. Already reported.
    Failed,
}

/// Single-flight upload gate.
///
/// Holds a one-permit semaphore. A submission takes the permit or is
/// dropped; the permit travels with the upload task and is returned when
/// that upload settles, whatever the outcome.
#[derive(Clone)]
pub struct UploadGate {
    inner: Arc<GateInner>,
}

struct GateInner {
    token: Arc<Semaphore>,
    closed: AtomicBool,
    display: Mutex<Option<Size>>,
    sink: Arc<dyn UploadSink>,
    notifier: Arc<dyn Notifier>,
    options: GateOptions,
}

impl UploadGate {
    pub fn new(
        sink: Arc<dyn UploadSink>,
        notifier: Arc<dyn Notifier>,
        options: GateOptions,
    ) -> Self {
        Self {
            inner: Arc::new(GateInner {
                token: Arc::new(Semaphore::new(1)),
                closed: AtomicBool::new(false),
                display: Mutex::new(None),
                sink,
                notifier,
                options,
            }),
        }
    }

    /// Size of the space submitted regions are expressed in. Regions are
    /// mapped onto the frame when the frame size differs.
    pub fn set_display(&self, display: Size) {
        *self
            .inner
            .display
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(display);
    }

    pub fn is_busy(&self) -> bool {
        self.inner.token.available_permits() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Stop accepting submissions. Uploads already in flight run to
    /// completion but their outcome is no longer reported.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.token.close();
    }

    /// Crop `region` out of `frame` and upload it, unless an upload is
    /// already in flight. Never blocks.
    pub fn submit(&self, region: &FaceRegion, frame: &Frame) -> Submission {
        if self.is_closed() {
            return Submission::Closed;
        }

        let permit = match Arc::clone(&self.inner.token).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => {
                tracing::trace!("upload in flight; dropping region");
                return Submission::Busy;
            }
            Err(TryAcquireError::Closed) => return Submission::Closed,
        };

        let id = Uuid::new_v4();
        let rect = self.inner.to_frame(region.bounds, frame.size());

        let face = match encode::crop(frame, &rect) {
            Ok(face) => face,
            Err(e) => {
                drop(permit);
                tracing::warn!(attempt = %id, error = %e, "failed to crop face");
                self.inner.report(Event::EncodeFailed {
                    reason: e.to_string(),
                });
                return Submission::Failed;
            }
        };

        tracing::debug!(
            attempt = %id,
            width = face.width(),
            height = face.height(),
            confidence = region.confidence,
            "dispatching face upload"
        );

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let event = inner.encode_and_upload(id, face).await;
            // Release before reporting so a listener reacting to the
            // notification already sees an idle gate.
            drop(permit);
            inner.report(event);
        });

        Submission::Dispatched(id)
    }
}

impl GateInner {
    fn to_frame(&self, rect: Rect, frame: Size) -> Rect {
        let display = *self
            .display
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match display {
            Some(display) if display != frame && !display.is_empty() => {
                rect.resize(display, frame)
            }
            _ => rect,
        }
    }

    async fn encode_and_upload(&self, id: Uuid, face: RgbImage) -> Event {
        let quality = self.options.jpeg_quality;
        let encoded =
            tokio::task::spawn_blocking(move || encode::encode_jpeg(&face, quality)).await;

        let image = match encoded {
            Ok(Ok(image)) => image,
            Ok(Err(e)) => {
                tracing::warn!(attempt = %id, error = %e, "failed to encode face");
                return Event::EncodeFailed {
                    reason: e.to_string(),
                };
            }
            Err(e) => {
                tracing::error!(attempt = %id, error = %e, "encode task failed");
                return Event::EncodeFailed {
                    reason: e.to_string(),
                };
            }
        };

        let limit = self.options.upload_timeout;
        let result = match tokio::time::timeout(limit, self.sink.upload(image)).await {
            Ok(result) => result,
            Err(_) => Err(UploadError::TimedOut(limit)),
        };

        match result {
            Ok(recognition) => {
                tracing::info!(attempt = %id, name = %recognition.name, "face recognized");
                Event::Recognized {
                    name: recognition.name,
                }
            }
            Err(e) => {
                tracing::warn!(attempt = %id, error = %e, "face upload failed");
                Event::UploadFailed {
                    reason: e.to_string(),
                }
            }
        }
    }

    fn report(&self, event: Event) {
        if self.closed.load(Ordering::SeqCst) {
            tracing::debug!(?event, "gate closed; suppressing notification");
            return;
        }
        self.notifier.notify(Notification::new(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{solid_frame, RecordingNotifier, RecordingSink};

    fn region(x: f32, y: f32, w: f32, h: f32) -> FaceRegion {
        FaceRegion::new(Rect::new(x, y, w, h), 0.9)
    }

    fn gate(sink: &Arc<RecordingSink>, notifier: &Arc<RecordingNotifier>) -> UploadGate {
        UploadGate::new(sink.clone(), notifier.clone(), GateOptions::default())
    }

    /// Let spawned upload tasks run to completion.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_first_submission_dispatches() {
        let sink = Arc::new(RecordingSink::hanging());
        let notifier = Arc::new(RecordingNotifier::default());
        let gate = gate(&sink, &notifier);
        let frame = solid_frame(Size::new(640, 480));

        let results: Vec<Submission> = [
            region(10.0, 10.0, 50.0, 50.0),
            region(200.0, 10.0, 50.0, 50.0),
            region(400.0, 10.0, 50.0, 50.0),
        ]
        .iter()
        .map(|r| gate.submit(r, &frame))
        .collect();

        assert!(matches!(results[0], Submission::Dispatched(_)));
        assert_eq!(results[1], Submission::Busy);
        assert_eq!(results[2], Submission::Busy);
        assert!(gate.is_busy());

        settle().await;
        assert_eq!(sink.upload_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_released_after_success() {
        let sink = Arc::new(RecordingSink::recognizing("Ada"));
        let notifier = Arc::new(RecordingNotifier::default());
        let gate = gate(&sink, &notifier);
        let frame = solid_frame(Size::new(640, 480));

        assert!(matches!(
            gate.submit(&region(10.0, 10.0, 100.0, 100.0), &frame),
            Submission::Dispatched(_)
        ));
        settle().await;

        assert!(!gate.is_busy());
        assert_eq!(
            notifier.events(),
            vec![Event::Recognized { name: "Ada".into() }]
        );
        assert!(matches!(
            gate.submit(&region(10.0, 10.0, 100.0, 100.0), &frame),
            Submission::Dispatched(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_released_after_failure() {
        let sink = Arc::new(RecordingSink::failing(503));
        let notifier = Arc::new(RecordingNotifier::default());
        let gate = gate(&sink, &notifier);
        let frame = solid_frame(Size::new(640, 480));

        gate.submit(&region(10.0, 10.0, 100.0, 100.0), &frame);
        settle().await;

        assert!(!gate.is_busy());
        let events = notifier.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Event::UploadFailed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_deadline_releases_token() {
        let sink = Arc::new(RecordingSink::hanging());
        let notifier = Arc::new(RecordingNotifier::default());
        let gate = gate(&sink, &notifier);
        let frame = solid_frame(Size::new(640, 480));

        gate.submit(&region(10.0, 10.0, 100.0, 100.0), &frame);
        tokio::time::sleep(Duration::from_secs(14)).await;
        assert!(gate.is_busy());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!gate.is_busy());
        match notifier.events().as_slice() {
            [Event::UploadFailed { reason }] => assert!(reason.contains("did not settle")),
            other => panic!("expected one upload failure, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_crop_fails_and_releases_token() {
        let sink = Arc::new(RecordingSink::recognizing("Ada"));
        let notifier = Arc::new(RecordingNotifier::default());
        let gate = gate(&sink, &notifier);
        let frame = solid_frame(Size::new(640, 480));

        assert_eq!(
            gate.submit(&region(10.0, 10.0, 0.0, 50.0), &frame),
            Submission::Failed
        );
        assert!(!gate.is_busy());
        assert_eq!(
            gate.submit(&region(10.0, 10.0, 50.0, 0.0), &frame),
            Submission::Failed
        );
        assert!(!gate.is_busy());

        let events = notifier.events();
        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .all(|e| matches!(e, Event::EncodeFailed { .. })));
        assert_eq!(sink.upload_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_maps_display_region_onto_frame() {
        let sink = Arc::new(RecordingSink::recognizing("Ada"));
        let notifier = Arc::new(RecordingNotifier::default());
        let gate = gate(&sink, &notifier);
        gate.set_display(Size::new(640, 480));
        let frame = solid_frame(Size::new(320, 240));

        gate.submit(&region(20.0, 20.0, 100.0, 100.0), &frame);
        settle().await;

        assert_eq!(sink.uploaded_sizes(), vec![(50, 50)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_gate_rejects_and_suppresses() {
        let sink = Arc::new(RecordingSink::recognizing("Ada"));
        let notifier = Arc::new(RecordingNotifier::default());
        let gate = gate(&sink, &notifier);
        let frame = solid_frame(Size::new(640, 480));

        gate.submit(&region(10.0, 10.0, 100.0, 100.0), &frame);
        gate.close();
        settle().await;

        assert_eq!(sink.upload_count(), 1);
        assert!(notifier.events().is_empty());
        assert_eq!(
            gate.submit(&region(10.0, 10.0, 100.0, 100.0), &frame),
            Submission::Closed
        );
    }
}
