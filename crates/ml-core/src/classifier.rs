use tracing::warn;

use crate::{
    landmarks::FeatureVector,
    model::{SignModel, TensorData},
    verdict::FrameLabel,
};

/// Outcome of one gated inference.
#[derive(Clone, Debug, PartialEq)]
pub struct Classification {
    pub label: FrameLabel,
    /// Tracked confidence; 0.0 for every sentinel including `Low Confidence`.
    pub confidence: f32,
    /// Top probability as returned by the model, kept for display.
    pub score: f32,
}

impl Classification {
    pub fn sentinel(label: FrameLabel) -> Self {
        Self {
            label,
            confidence: 0.0,
            score: 0.0,
        }
    }
}

/// Cast, shape-check and run `features` through `model`, then gate the top
/// class on `min_confidence`.
pub fn classify(
    features: &FeatureVector,
    model: &dyn SignModel,
    labels: &[String],
    min_confidence: f32,
) -> Classification {
    let spec = model.input_spec();
    if !spec.accepts(features.len()) {
        warn!(
            expected = ?spec.shape,
            actual = features.len(),
            "feature vector does not match model input"
        );
        return Classification::sentinel(FrameLabel::InputShape);
    }

    let input = TensorData::cast(features.as_slice(), spec.dtype);
    let probabilities = match model.infer(&input) {
        Ok(probabilities) => probabilities,
        Err(err) => {
            warn!("inference failed: {err}");
            return Classification::sentinel(FrameLabel::DetectError);
        }
    };

    let Some((index, score)) = argmax(&probabilities) else {
        warn!(len = probabilities.len(), "model returned no usable probabilities");
        return Classification::sentinel(FrameLabel::DetectError);
    };

    if score < min_confidence {
        return Classification {
            label: FrameLabel::LowConfidence,
            confidence: 0.0,
            score,
        };
    }

    match labels.get(index) {
        Some(name) => Classification {
            label: FrameLabel::Sign(name.clone()),
            confidence: score,
            score,
        },
        None => {
            warn!(index, labels = labels.len(), "predicted class has no label");
            Classification::sentinel(FrameLabel::DetectError)
        }
    }
}

/// Index and value of the largest element; `None` for empty input or NaN.
fn argmax(values: &[f32]) -> Option<(usize, f32)> {
    if values.iter().any(|v| v.is_nan()) {
        return None;
    }
    values
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
}
