//! Live video acquisition.

use crate::frame::Frame;
use crate::types::Size;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("permission denied opening {0}")]
    PermissionDenied(String),
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy: {0}")]
    DeviceBusy(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("capture stream not started")]
    NotStarted,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
}

/// Properties of a started stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    /// Negotiated frame size; the display size the overlay tracks.
    pub size: Size,
}

/// A camera-like source of frames.
///
/// Dropping the source releases the device.
pub trait CaptureSource: Send {
    /// Acquire the device and begin streaming.
    fn start(&mut self) -> Result<StreamInfo, CaptureError>;

    /// The most recent frame.
    fn current_frame(&mut self) -> Result<Frame, CaptureError>;
}
