use crate::engine::EngineHandle;
use crate::gate::{Submission, UploadGate};
use crate::readiness::Readiness;
use facegate_core::{Event, FaceRegion, Frame, Notification, Notifier, Overlay, Size};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Constructed, no timer.
    Idle,
    /// Playback started; waiting for the detector models.
    WaitingForReadiness,
    /// Detection cycles firing.
    Running,
    /// Terminal.
    Stopped,
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerOptions {
    /// Period between detection cycles; the first fires one period after
    /// entering [`SchedulerState::Running`].
    pub interval: Duration,
    /// Give up waiting for models after this long. `None` waits forever.
    pub readiness_timeout: Option<Duration>,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(5000),
            readiness_timeout: Some(Duration::from_secs(60)),
        }
    }
}

/// Periodic detection driver.
///
/// Every tick runs one cycle as its own task: grab a frame, detect, redraw
/// the overlay, offer each region to the upload gate. Each tick takes a new
/// generation number and a cycle whose generation is no longer current when
/// detection returns drops its results. A tick that fires while a detection
/// is still running skips detection but still advances the generation.
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    engine: EngineHandle,
    readiness: Readiness,
    gate: UploadGate,
    overlay: Arc<Mutex<Overlay>>,
    notifier: Arc<dyn Notifier>,
    options: SchedulerOptions,
    generation: AtomicU64,
    state: watch::Sender<SchedulerState>,
    /// Set while a cycle is inside detection.
    detecting: AtomicBool,
    /// Held by `stop` and around every currency check that leads to a side
    /// effect, so nothing is drawn or submitted once `stop` has returned.
    commit: Mutex<()>,
}

/// Clears [`Inner::detecting`] however the detection ends.
struct DetectingGuard<'a>(&'a AtomicBool);

impl Drop for DetectingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Scheduler {
    pub fn new(
        engine: EngineHandle,
        readiness: Readiness,
        gate: UploadGate,
        overlay: Arc<Mutex<Overlay>>,
        notifier: Arc<dyn Notifier>,
        options: SchedulerOptions,
    ) -> Self {
        let (state, _rx) = watch::channel(SchedulerState::Idle);
        Self {
            inner: Arc::new(Inner {
                engine,
                readiness,
                gate,
                overlay,
                notifier,
                options,
                generation: AtomicU64::new(0),
                state,
                detecting: AtomicBool::new(false),
                commit: Mutex::new(()),
            }),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.inner.state.borrow()
    }

    /// Playback has begun at `display` size. Sizes the overlay, then waits
    /// for the models before starting the cycle timer.
    pub fn start(&self, display: Size) {
        if !self
            .inner
            .transition(SchedulerState::Idle, SchedulerState::WaitingForReadiness)
        {
            tracing::warn!(state = ?self.state(), "scheduler already started");
            return;
        }

        self.inner.lock_overlay().match_dimensions(display);
        self.inner.gate.set_display(display);
        tracing::info!(%display, "waiting for detector models");

        tokio::spawn(Arc::clone(&self.inner).run(display));
    }

    /// Cancel the timer. Detections already in flight finish but their
    /// results are dropped.
    pub fn stop(&self) {
        self.inner.stop();
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Inner {
    /// Move from `from` to `to`; false if the state was not `from`.
    fn transition(&self, from: SchedulerState, to: SchedulerState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    fn stop(&self) {
        let _commit = self.lock_commit();
        self.generation.fetch_add(1, Ordering::SeqCst);
        let previous = self.state.send_replace(SchedulerState::Stopped);
        if previous != SchedulerState::Stopped {
            tracing::info!(?previous, "scheduler stopped");
        }
    }

    fn lock_overlay(&self) -> MutexGuard<'_, Overlay> {
        self.overlay.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_commit(&self) -> MutexGuard<'_, ()> {
        self.commit.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
            && *self.state.borrow() == SchedulerState::Running
    }

    /// Redraw the overlay if `generation` is still current.
    fn draw_current(&self, generation: u64, regions: &[FaceRegion]) -> bool {
        let _commit = self.lock_commit();
        if !self.is_current(generation) {
            return false;
        }
        self.lock_overlay().draw(regions);
        true
    }

    /// Offer `region` to the gate if `generation` is still current.
    fn submit_current(
        &self,
        generation: u64,
        region: &FaceRegion,
        frame: &Frame,
    ) -> Option<Submission> {
        let _commit = self.lock_commit();
        if !self.is_current(generation) {
            return None;
        }
        Some(self.gate.submit(region, frame))
    }

    async fn run(self: Arc<Self>, display: Size) {
        let mut state_rx = self.state.subscribe();

        let ready = match self.options.readiness_timeout {
            Some(limit) => tokio::select! {
                r = tokio::time::timeout(limit, self.readiness.wait()) => r.is_ok(),
                _ = stopped(&mut state_rx) => return,
            },
            None => tokio::select! {
                _ = self.readiness.wait() => true,
                _ = stopped(&mut state_rx) => return,
            },
        };

        if !ready {
            let waited = self.options.readiness_timeout.unwrap_or_default();
            tracing::error!(
                waited_secs = waited.as_secs(),
                "detector models not ready in time; giving up"
            );
            if self.transition(SchedulerState::WaitingForReadiness, SchedulerState::Stopped) {
                self.generation.fetch_add(1, Ordering::SeqCst);
                self.notifier
                    .notify(Notification::new(Event::ReadinessTimedOut {
                        waited_secs: waited.as_secs(),
                    }));
            }
            return;
        }

        if !self.transition(SchedulerState::WaitingForReadiness, SchedulerState::Running) {
            return;
        }

        let period = self.options.interval;
        tracing::info!(interval_ms = period.as_millis() as u64, "detection running");

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    tokio::spawn(Arc::clone(&self).cycle(generation, display));
                }
                _ = stopped(&mut state_rx) => break,
            }
        }
        tracing::debug!("cycle timer cancelled");
    }

    async fn cycle(self: Arc<Self>, generation: u64, display: Size) {
        if !self.readiness.is_ready() {
            tracing::trace!(generation, "models not ready; skipping cycle");
            return;
        }

        if self.detecting.swap(true, Ordering::SeqCst) {
            tracing::warn!(generation, "previous detection still running; skipping cycle");
            return;
        }

        let result = {
            let _detecting = DetectingGuard(&self.detecting);
            self.engine.detect_current().await
        };
        let (frame, detections) = match result {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(generation, error = %e, "detection failed; skipping cycle");
                return;
            }
        };

        let regions = detections.resize_to(display);
        if !self.draw_current(generation, &regions) {
            tracing::debug!(generation, "discarding stale detection");
            return;
        }
        if regions.is_empty() {
            return;
        }
        tracing::debug!(generation, faces = regions.len(), "faces detected");

        for region in &regions {
            match self.submit_current(generation, region, &frame) {
                Some(Submission::Dispatched(attempt)) => {
                    tracing::debug!(generation, %attempt, "region submitted");
                }
                Some(Submission::Busy | Submission::Failed) => {}
                Some(Submission::Closed) | None => return,
            }
        }
    }
}

async fn stopped(rx: &mut watch::Receiver<SchedulerState>) {
    // Sender lives in `Inner`, which outlives every receiver borrow here.
    let _ = rx.wait_for(|s| *s == SchedulerState::Stopped).await;
}
