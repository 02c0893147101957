//! V4L2 camera capture via the `v4l` crate.

use crate::convert::{self, ConvertError};
use facegate_core::{CaptureError, CaptureSource, Frame, Size, StreamInfo};
use std::io::ErrorKind;
use std::path::Path;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Resolution requested at start; the driver may negotiate another.
pub const DEFAULT_CAPTURE_SIZE: Size = Size::new(640, 480);

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// Motion-JPEG, one JPEG per buffer.
    Mjpg,
    /// 8-bit grayscale.
    Grey,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        if fourcc == FourCC::new(b"YUYV") {
            Some(Self::Yuyv)
        } else if fourcc == FourCC::new(b"MJPG") {
            Some(Self::Mjpg)
        } else if fourcc == FourCC::new(b"GREY") {
            Some(Self::Grey)
        } else {
            None
        }
    }
}

/// An opened, format-negotiated device.
struct OpenDevice {
    device: Device,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
}

/// V4L2 camera. Opens the device on [`CaptureSource::start`]; the device is
/// released when the camera is dropped.
pub struct V4lCamera {
    device_path: String,
    requested: Size,
    open: Option<OpenDevice>,
}

impl V4lCamera {
    pub fn new(device_path: impl Into<String>, requested: Size) -> Self {
        Self {
            device_path: device_path.into(),
            requested,
            open: None,
        }
    }

    pub fn pixel_format(&self) -> Option<PixelFormat> {
        self.open.as_ref().map(|o| o.pixel_format)
    }

    fn open_device(&self) -> Result<OpenDevice, CaptureError> {
        let path = self.device_path.as_str();
        if !Path::new(path).exists() {
            return Err(CaptureError::DeviceNotFound(path.to_string()));
        }

        let device = Device::with_path(path).map_err(|e| match e.kind() {
            ErrorKind::PermissionDenied => CaptureError::PermissionDenied(path.to_string()),
            _ if e.raw_os_error() == Some(16) => CaptureError::DeviceBusy(path.to_string()), // EBUSY
            _ => CaptureError::DeviceNotFound(format!("{path}: {e}")),
        })?;

        let caps = device.query_caps().map_err(|e| {
            CaptureError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps
            .capabilities
            .contains(v4l::capability::Flags::VIDEO_CAPTURE)
        {
            return Err(CaptureError::StreamingNotSupported);
        }

        // Ask for YUYV; accept MJPG or GREY if the driver insists.
        let mut fmt = device.format().map_err(|e| {
            CaptureError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = self.requested.width;
        fmt.height = self.requested.height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CaptureError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            CaptureError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV, MJPG, or GREY)",
                negotiated.fourcc
            ))
        })?;

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "negotiated format"
        );

        Ok(OpenDevice {
            device,
            width: negotiated.width,
            height: negotiated.height,
            pixel_format,
        })
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps
                .capabilities
                .contains(v4l::capability::Flags::VIDEO_CAPTURE)
            {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

impl CaptureSource for V4lCamera {
    fn start(&mut self) -> Result<StreamInfo, CaptureError> {
        if self.open.is_none() {
            self.open = Some(self.open_device()?);
        }
        let open = self.open.as_ref().ok_or(CaptureError::NotStarted)?;
        Ok(StreamInfo {
            size: Size::new(open.width, open.height),
        })
    }

    fn current_frame(&mut self) -> Result<Frame, CaptureError> {
        let open = self.open.as_ref().ok_or(CaptureError::NotStarted)?;

        let mut stream =
            MmapStream::with_buffers(&open.device, BufType::VideoCapture, 4).map_err(|e| {
                CaptureError::CaptureFailed(format!("failed to create mmap stream: {e}"))
            })?;

        let (buf, meta) = stream
            .next()
            .map_err(|e| CaptureError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

        let image = match open.pixel_format {
            PixelFormat::Yuyv => convert::yuyv_to_rgb(buf, open.width, open.height),
            PixelFormat::Grey => convert::grey_to_rgb(buf, open.width, open.height),
            PixelFormat::Mjpg => {
                convert::mjpeg_to_rgb(buf.get(..meta.bytesused as usize).unwrap_or(buf))
            }
        }
        .map_err(|e: ConvertError| CaptureError::CaptureFailed(e.to_string()))?;

        Ok(Frame::from_image(image, meta.sequence))
    }
}

impl Drop for V4lCamera {
    fn drop(&mut self) {
        if self.open.take().is_some() {
            tracing::info!(device = %self.device_path, "camera released");
        }
    }
}
