//! User-facing success/failure events.
//!
//! The daemon never renders anything itself; it hands [`Notification`]s to a
//! [`Notifier`], which a kiosk front-end turns into toasts.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    ModelsLoaded,
    ModelLoadFailed { reason: String },
    CameraUnavailable { reason: String },
    Recognized { name: String },
    UploadFailed { reason: String },
    EncodeFailed { reason: String },
    ReadinessTimedOut { waited_secs: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    #[serde(flatten)]
    pub event: Event,
    pub severity: Severity,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl Notification {
    pub fn new(event: Event) -> Self {
        let severity = match event {
            Event::ModelsLoaded | Event::Recognized { .. } => Severity::Success,
            _ => Severity::Error,
        };
        let message = match &event {
            Event::ModelsLoaded => "Face detection models loaded!".to_string(),
            Event::ModelLoadFailed { .. } => "Failed to load models".to_string(),
            Event::CameraUnavailable { .. } => "Unable to access camera".to_string(),
            Event::Recognized { name } => format!("Person recognized: {name}"),
            Event::UploadFailed { .. } | Event::EncodeFailed { .. } => {
                "Failed to send image.".to_string()
            }
            Event::ReadinessTimedOut { .. } => "Face detection is unavailable".to_string(),
        };
        Self {
            event,
            severity,
            message,
            at: Utc::now(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Sink for notifications. Must not block.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Emits notifications as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, n: Notification) {
        if n.is_error() {
            tracing::error!(event = ?n.event, "{}", n.message);
        } else {
            tracing::info!(event = ?n.event, "{}", n.message);
        }
    }
}

/// Writes one JSON object per line, for a front-end reading the daemon's stdout.
pub struct JsonLinesNotifier<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesNotifier<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<W: Write + Send> Notifier for JsonLinesNotifier<W> {
    fn notify(&self, n: Notification) {
        let line = match serde_json::to_string(&n) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize notification");
                return;
            }
        };
        let mut out = self
            .out
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Err(e) = writeln!(out, "{line}").and_then(|_| out.flush()) {
            tracing::warn!(error = %e, "failed to write notification");
        }
    }
}
