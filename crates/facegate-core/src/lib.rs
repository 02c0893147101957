//! facegate-core — face detection, crop/encode and recognition upload.
//!
//! Detection chains SCRFD, a 106-point landmark net and ArcFace over ONNX
//! Runtime. Faces are cropped, JPEG-encoded and sent to a remote
//! recognition endpoint; outcomes surface as [`notify::Notification`]s.

pub mod alignment;
pub mod capture;
pub mod detector;
pub mod encode;
pub mod frame;
mod landmarks;
pub mod notify;
pub mod overlay;
mod recognizer;
mod scrfd;
pub mod types;
pub mod upload;

pub use capture::{CaptureError, CaptureSource, StreamInfo};
pub use detector::{
    default_model_dir, DetectorError, DetectorOptions, FaceDetector, ModelLoadError, ModelSet,
    OnnxFaceDetector,
};
pub use encode::{EncodeError, EncodedImage};
pub use frame::Frame;
pub use notify::{Event, Notification, Notifier};
pub use overlay::Overlay;
pub use types::{Descriptor, Detections, FaceRegion, Point, Rect, Size};
pub use upload::{HttpUploadSink, Recognition, UploadError, UploadSink};
