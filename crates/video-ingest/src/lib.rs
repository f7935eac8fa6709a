//! Frame sources feeding the recognition pipeline.
//!
//! A [`FrameSource`] is pulled synchronously by whichever worker owns it: one
//! `read` call yields at most one frame. The OpenCV device backend is compiled
//! in with the `opencv` feature; without it [`open_camera`] reports
//! [`CaptureError::Unsupported`] and callers degrade to camera-less operation.

mod camera;
mod types;

#[cfg(feature = "opencv")]
pub use camera::OpenCvCamera;
pub use types::{CaptureError, Frame, FrameFormat};

/// Capture width used when none is configured.
pub const DEFAULT_CAPTURE_WIDTH: i32 = 640;
/// Capture height used when none is configured.
pub const DEFAULT_CAPTURE_HEIGHT: i32 = 480;

/// A pull-based camera handle.
pub trait FrameSource: Send {
    /// Read the next frame. `Ok(None)` is a transient empty read; callers should
    /// back off briefly and retry.
    fn read(&mut self) -> Result<Option<Frame>, CaptureError>;

    /// Whether the underlying device is still open.
    fn is_opened(&self) -> bool;

    /// Close the device. Calling this more than once is a no-op.
    fn release(&mut self);

    /// Short human-readable identifier for logs.
    fn describe(&self) -> String;
}

/// Device selection and capture format.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraSpec {
    pub uri: String,
    pub size: (i32, i32),
    pub fps: f64,
}

impl Default for CameraSpec {
    fn default() -> Self {
        Self {
            uri: "0".to_string(),
            size: (DEFAULT_CAPTURE_WIDTH, DEFAULT_CAPTURE_HEIGHT),
            fps: 30.0,
        }
    }
}

impl CameraSpec {
    /// Device index parsed from the URI, when the URI names a local device.
    pub fn device_index(&self) -> Option<i32> {
        camera::parse_device_index(&self.uri)
    }
}

/// Open the camera described by `spec`.
#[cfg(feature = "opencv")]
pub fn open_camera(spec: &CameraSpec) -> Result<Box<dyn FrameSource>, CaptureError> {
    Ok(Box::new(OpenCvCamera::open(spec)?))
}

/// Open the camera described by `spec`.
#[cfg(not(feature = "opencv"))]
pub fn open_camera(spec: &CameraSpec) -> Result<Box<dyn FrameSource>, CaptureError> {
    tracing::warn!(uri = %spec.uri, "camera requested but capture backend is not compiled in");
    Err(CaptureError::Unsupported)
}
