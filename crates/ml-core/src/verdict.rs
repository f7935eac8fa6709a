use std::fmt;

/// Per-frame classification outcome: a class label or one of the sentinels
/// that stand in for it when no sign could be read.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FrameLabel {
    Sign(String),
    NoHand,
    LowConfidence,
    LandmarkCount,
    InputShape,
    DetectError,
    InitializationError,
    NoImage,
}

impl FrameLabel {
    pub fn as_str(&self) -> &str {
        match self {
            FrameLabel::Sign(label) => label,
            FrameLabel::NoHand => "No hand detected",
            FrameLabel::LowConfidence => "Low Confidence",
            FrameLabel::LandmarkCount => "Landmark count error",
            FrameLabel::InputShape => "Input Shape Error",
            FrameLabel::DetectError => "Detect Error",
            FrameLabel::InitializationError => "Initialization Error",
            FrameLabel::NoImage => "Error: No image provided",
        }
    }

    /// True for real class labels.
    pub fn is_sign(&self) -> bool {
        matches!(self, FrameLabel::Sign(_))
    }

    /// Short name used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            FrameLabel::Sign(_) => "sign",
            FrameLabel::NoHand => "no_hand",
            FrameLabel::LowConfidence => "low_confidence",
            FrameLabel::LandmarkCount => "landmark_count",
            FrameLabel::InputShape => "input_shape",
            FrameLabel::DetectError => "detect_error",
            FrameLabel::InitializationError => "init_error",
            FrameLabel::NoImage => "no_image",
        }
    }
}

impl fmt::Display for FrameLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_render_their_display_text() {
        assert_eq!(FrameLabel::NoHand.to_string(), "No hand detected");
        assert_eq!(FrameLabel::NoImage.to_string(), "Error: No image provided");
        assert_eq!(FrameLabel::Sign("B".into()).to_string(), "B");
    }

    #[test]
    fn only_class_labels_count_as_signs() {
        assert!(FrameLabel::Sign("A".into()).is_sign());
        assert!(!FrameLabel::LowConfidence.is_sign());
        assert!(!FrameLabel::DetectError.is_sign());
    }
}
