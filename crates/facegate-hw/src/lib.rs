//! facegate-hw — Hardware abstraction for camera capture.
//!
//! Provides a V4L2 [`CaptureSource`](facegate_core::CaptureSource) with
//! YUYV, MJPG and GREY to RGB conversion.

pub mod camera;
pub mod convert;

pub use camera::{DeviceInfo, PixelFormat, V4lCamera, DEFAULT_CAPTURE_SIZE};
