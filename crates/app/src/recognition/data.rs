use ml_core::FrameLabel;
use serde::Serialize;

/// Label plus confidence, as returned to callers and serialised over HTTP.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Prediction {
    pub sign: String,
    pub confidence: f32,
}

impl Prediction {
    pub fn new(sign: impl Into<String>, confidence: f32) -> Self {
        Self {
            sign: sign.into(),
            confidence,
        }
    }

    pub(crate) fn from_label(label: &FrameLabel, confidence: f32) -> Self {
        Self::new(label.as_str(), confidence)
    }
}

/// One encoded frame emitted by the stream.
#[derive(Clone, Debug)]
pub struct StreamChunk {
    pub jpeg: Vec<u8>,
    pub frame_number: u64,
    pub timestamp_ms: i64,
    /// Per-frame classification; `None` for placeholder frames.
    pub instantaneous: Option<FrameLabel>,
    pub stable: Prediction,
}

impl StreamChunk {
    pub fn is_placeholder(&self) -> bool {
        self.instantaneous.is_none()
    }

    /// Frame wrapped as one part of a `multipart/x-mixed-replace; boundary=frame` body.
    pub fn multipart(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(self.jpeg.len() + 64);
        payload.extend_from_slice(b"--frame\r\n");
        payload.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
        payload.extend_from_slice(&self.jpeg);
        payload.extend_from_slice(b"\r\n");
        payload
    }
}
