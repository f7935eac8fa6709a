//! OpenCV-backed camera capture.

#[cfg(feature = "opencv")]
pub use backend::OpenCvCamera;

/// Parse a `/dev/videoX` style URI (or a bare index) and return the zero-based index.
pub(crate) fn parse_device_index(uri: &str) -> Option<i32> {
    if let Ok(index) = uri.parse::<i32>() {
        return Some(index);
    }
    if let Some(stripped) = uri.strip_prefix("/dev/video") {
        if !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(index) = stripped.parse::<i32>() {
                return Some(index);
            }
        }
    }
    None
}

#[cfg(feature = "opencv")]
mod backend {
    use chrono::Utc;
    use opencv::{
        core::{self, MatTraitConstManual},
        prelude::*,
        videoio::{self, VideoCapture, VideoCaptureTrait, VideoCaptureTraitConst},
    };
    use tracing::{debug, warn};

    use super::parse_device_index;
    use crate::{
        CameraSpec, FrameSource,
        types::{CaptureError, Frame, FrameFormat},
    };

    /// Synchronous `VideoCapture` wrapper; one `read` call pulls one frame.
    pub struct OpenCvCamera {
        uri: String,
        capture: Option<VideoCapture>,
        target_size: (i32, i32),
        frame: Mat,
        scratch: Mat,
    }

    impl OpenCvCamera {
        pub fn open(spec: &CameraSpec) -> Result<Self, CaptureError> {
            let mut capture = open_video_capture(&spec.uri)?;
            configure_camera(&mut capture, spec.size, spec.fps);
            debug!(uri = %spec.uri, width = spec.size.0, height = spec.size.1, "camera opened");
            Ok(Self {
                uri: spec.uri.clone(),
                capture: Some(capture),
                target_size: spec.size,
                frame: Mat::default(),
                scratch: Mat::default(),
            })
        }
    }

    impl FrameSource for OpenCvCamera {
        fn read(&mut self) -> Result<Option<Frame>, CaptureError> {
            let capture = self.capture.as_mut().ok_or_else(|| CaptureError::Closed {
                uri: self.uri.clone(),
            })?;
            if !capture
                .is_opened()
                .map_err(|e| CaptureError::Other(e.into()))?
            {
                return Err(CaptureError::Closed {
                    uri: self.uri.clone(),
                });
            }

            let grabbed = capture
                .read(&mut self.frame)
                .map_err(|e| CaptureError::Other(e.into()))?;
            let size = self
                .frame
                .size()
                .map_err(|e| CaptureError::Other(e.into()))?;
            if !grabbed || size.width <= 0 || size.height <= 0 {
                return Ok(None);
            }

            let (target_w, target_h) = self.target_size;
            let working = if size.width != target_w || size.height != target_h {
                opencv::imgproc::resize(
                    &self.frame,
                    &mut self.scratch,
                    core::Size {
                        width: target_w,
                        height: target_h,
                    },
                    0.0,
                    0.0,
                    opencv::imgproc::INTER_LINEAR,
                )
                .map_err(|e| CaptureError::Other(e.into()))?;
                &self.scratch
            } else {
                &self.frame
            };

            let data = working
                .data_bytes()
                .map_err(|e| CaptureError::Other(e.into()))?
                .to_vec();

            Ok(Some(Frame {
                data,
                width: target_w,
                height: target_h,
                timestamp_ms: Utc::now().timestamp_millis(),
                format: FrameFormat::Bgr8,
            }))
        }

        fn is_opened(&self) -> bool {
            self.capture
                .as_ref()
                .and_then(|capture| capture.is_opened().ok())
                .unwrap_or(false)
        }

        fn release(&mut self) {
            if let Some(mut capture) = self.capture.take() {
                if let Err(err) = capture.release() {
                    warn!(uri = %self.uri, "failed to release camera: {err}");
                }
            }
        }

        fn describe(&self) -> String {
            format!("opencv:{}", self.uri)
        }
    }

    impl Drop for OpenCvCamera {
        fn drop(&mut self) {
            self.release();
        }
    }

    /// Attempt to open a camera input either by index or URI.
    fn open_video_capture(uri: &str) -> Result<VideoCapture, CaptureError> {
        if let Some(index) = parse_device_index(uri) {
            for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
                match VideoCapture::new(index, backend) {
                    Ok(cap) => {
                        if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                            return Ok(cap);
                        }
                    }
                    Err(err) => {
                        warn!("failed to open device #{index} with backend {backend}: {err}");
                    }
                }
            }
        }

        for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
            match VideoCapture::from_file(uri, backend) {
                Ok(cap) => {
                    if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                        return Ok(cap);
                    }
                }
                Err(err) => {
                    warn!("failed to open {uri} with backend {backend}: {err}");
                }
            }
        }

        Err(CaptureError::Open {
            uri: uri.to_string(),
        })
    }

    /// Apply common capture settings (resolution, fps, preferred pixel format).
    fn configure_camera(cap: &mut VideoCapture, target_size: (i32, i32), fps: f64) {
        let mut fourcc_set = false;
        if let Ok(mjpg) = videoio::VideoWriter::fourcc('M', 'J', 'P', 'G') {
            if matches!(cap.set(videoio::CAP_PROP_FOURCC, mjpg as f64), Ok(true)) {
                fourcc_set = true;
            }
        }
        if !fourcc_set {
            if let Ok(yuyv) = videoio::VideoWriter::fourcc('Y', 'U', 'Y', 'V') {
                let _ = cap.set(videoio::CAP_PROP_FOURCC, yuyv as f64);
            }
        }
        let _ = cap.set(videoio::CAP_PROP_FRAME_WIDTH, target_size.0 as f64);
        let _ = cap.set(videoio::CAP_PROP_FRAME_HEIGHT, target_size.1 as f64);
        let _ = cap.set(videoio::CAP_PROP_FPS, fps);
    }
}

#[cfg(test)]
mod tests {
    use super::parse_device_index;

    #[test]
    fn parses_bare_and_dev_indices() {
        assert_eq!(parse_device_index("0"), Some(0));
        assert_eq!(parse_device_index("/dev/video2"), Some(2));
    }

    #[test]
    fn rejects_non_device_uris() {
        assert_eq!(parse_device_index("/dev/video"), None);
        assert_eq!(parse_device_index("/dev/videoX"), None);
        assert_eq!(parse_device_index("rtsp://camera.local/stream"), None);
    }
}
