use thiserror::Error;

/// Raw frame captured from a video source.
#[derive(Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: i32,
    pub height: i32,
    pub timestamp_ms: i64,
    pub format: FrameFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    Bgr8,
    Rgb8,
}

impl Frame {
    /// Expected buffer length for the frame's dimensions (3 bytes per pixel).
    pub fn expected_len(&self) -> usize {
        (self.width.max(0) as usize) * (self.height.max(0) as usize) * 3
    }

    /// Return the pixel buffer in RGB order, swapping channels for BGR frames.
    pub fn to_rgb_bytes(&self) -> Vec<u8> {
        match self.format {
            FrameFormat::Rgb8 => self.data.clone(),
            FrameFormat::Bgr8 => {
                let mut output = Vec::with_capacity(self.data.len());
                for chunk in self.data.chunks_exact(3) {
                    output.push(chunk[2]);
                    output.push(chunk[1]);
                    output.push(chunk[0]);
                }
                output
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open video source {uri:?}")]
    Open { uri: String },
    #[error("video source {uri:?} is closed")]
    Closed { uri: String },
    #[error("camera capture is not compiled in (enable the `opencv` feature)")]
    Unsupported,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgr_frames_are_swapped_to_rgb() {
        let frame = Frame {
            data: vec![1, 2, 3, 4, 5, 6],
            width: 2,
            height: 1,
            timestamp_ms: 0,
            format: FrameFormat::Bgr8,
        };
        assert_eq!(frame.expected_len(), 6);
        assert_eq!(frame.to_rgb_bytes(), vec![3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn rgb_frames_pass_through() {
        let frame = Frame {
            data: vec![9, 8, 7],
            width: 1,
            height: 1,
            timestamp_ms: 0,
            format: FrameFormat::Rgb8,
        };
        assert_eq!(frame.to_rgb_bytes(), vec![9, 8, 7]);
    }
}
