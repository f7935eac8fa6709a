//! Per-frame analysis shared by the stream and the single-frame service:
//! detect a hand, normalise its landmarks, classify the feature vector.

use std::time::Instant;

use image::RgbImage;
use ml_core::{Classification, FrameLabel, LandmarkSet, classify, normalize};
use tracing::{debug, warn};

use crate::recognition::lifecycle::InferenceHandles;

/// Classification for one image plus the landmarks it was derived from.
#[derive(Clone, Debug)]
pub(crate) struct FrameAnalysis {
    pub(crate) classification: Classification,
    pub(crate) landmarks: Option<LandmarkSet>,
}

impl FrameAnalysis {
    fn sentinel(label: FrameLabel, landmarks: Option<LandmarkSet>) -> Self {
        Self {
            classification: Classification::sentinel(label),
            landmarks,
        }
    }
}

/// Run detection and classification. Every failure becomes a sentinel label.
pub(crate) fn analyze(
    image: &RgbImage,
    handles: &InferenceHandles,
    min_confidence: f32,
) -> FrameAnalysis {
    let started = Instant::now();
    let detected = handles.detector.detect(image);
    metrics::histogram!("signsight_detect_ms").record(elapsed_ms(started));

    let landmarks = match detected {
        Ok(Some(landmarks)) => landmarks,
        Ok(None) => return FrameAnalysis::sentinel(FrameLabel::NoHand, None),
        Err(err) => {
            warn!("hand detection failed: {err}");
            return FrameAnalysis::sentinel(FrameLabel::DetectError, None);
        }
    };

    let features = match normalize(&landmarks) {
        Ok(features) => features,
        Err(err) => {
            debug!("{err}");
            return FrameAnalysis::sentinel(FrameLabel::LandmarkCount, Some(landmarks));
        }
    };

    let started = Instant::now();
    let classification = classify(
        &features,
        handles.classifier.as_ref(),
        &handles.labels,
        min_confidence,
    );
    metrics::histogram!("signsight_classify_ms").record(elapsed_ms(started));

    FrameAnalysis {
        classification,
        landmarks: Some(landmarks),
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
