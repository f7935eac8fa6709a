use base64::{Engine as _, engine::general_purpose::STANDARD};
use image::RgbImage;
use ml_core::FrameLabel;
use thiserror::Error;
use tracing::{debug, info_span, warn};

use crate::recognition::{
    data::Prediction, engine::RecognitionEngine, lifecycle::CameraExpectation,
    processing::analyze,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DataUrlError {
    #[error("image payload is not a data URL")]
    NotDataUrl,
    #[error("data URL is not base64 encoded")]
    NotBase64,
    #[error("image payload could not be decoded")]
    Decode,
}

/// Decode a `data:image/...;base64,<payload>` URL into raw bytes. A bare
/// base64 string without the `data:` prefix is accepted too.
pub fn decode_data_url(url: &str) -> Result<Vec<u8>, DataUrlError> {
    let url = url.trim();
    let payload = match url.strip_prefix("data:") {
        Some(rest) => {
            let (meta, payload) = rest.split_once(',').ok_or(DataUrlError::NotDataUrl)?;
            if !meta.ends_with(";base64") {
                return Err(DataUrlError::NotBase64);
            }
            payload
        }
        None if url.contains(',') => return Err(DataUrlError::NotDataUrl),
        None => url,
    };
    STANDARD.decode(payload).map_err(|_| DataUrlError::Decode)
}

impl RecognitionEngine {
    /// Classify one image without touching the stream's stabiliser. The image
    /// is used as given; it is not mirrored.
    pub fn predict_single_frame(&self, image: &RgbImage) -> Prediction {
        let span = info_span!("single_frame", width = image.width(), height = image.height());
        let _entered = span.enter();

        if image.width() == 0 || image.height() == 0 {
            return Prediction::from_label(&FrameLabel::NoImage, 0.0);
        }

        let handles = match self.inference_handles() {
            Some(handles) => handles,
            None => {
                if let Err(err) = self.acquire(CameraExpectation::NotNeeded) {
                    warn!("single-frame prediction unavailable: {err}");
                    return Prediction::from_label(&FrameLabel::InitializationError, 0.0);
                }
                match self.inference_handles() {
                    Some(handles) => handles,
                    None => return Prediction::from_label(&FrameLabel::InitializationError, 0.0),
                }
            }
        };

        let analysis = analyze(image, &handles, self.settings().single_frame_min_confidence);
        let classification = analysis.classification;
        metrics::counter!("signsight_single_frame_total", "label" => classification.label.kind())
            .increment(1);
        debug!(label = %classification.label, "single-frame prediction");
        Prediction::from_label(&classification.label, classification.confidence)
    }

    /// Decode an encoded image (JPEG, PNG, ...) and classify it.
    pub fn predict_image_bytes(&self, bytes: &[u8]) -> Prediction {
        if bytes.is_empty() {
            return Prediction::from_label(&FrameLabel::NoImage, 0.0);
        }
        match image::load_from_memory(bytes) {
            Ok(decoded) => self.predict_single_frame(&decoded.to_rgb8()),
            Err(err) => {
                debug!("could not decode submitted image: {err}");
                Prediction::from_label(&FrameLabel::NoImage, 0.0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Cursor, sync::Arc, sync::atomic::Ordering};

    use image::{ImageFormat, Rgb};

    use super::*;
    use crate::recognition::{
        config::{CameraMode, EngineSettings},
        testing::FakeFactory,
    };

    fn engine(factory: &Arc<FakeFactory>) -> RecognitionEngine {
        let settings = EngineSettings {
            camera: CameraMode::Device("0".into()),
            ..EngineSettings::default()
        };
        RecognitionEngine::new(factory.clone(), settings)
    }

    fn png_bytes() -> Vec<u8> {
        let image = RgbImage::from_pixel(16, 16, Rgb([90, 90, 90]));
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn predicts_without_opening_camera_or_touching_stabilizer() {
        let factory = Arc::new(FakeFactory::confident());
        let engine = engine(&factory);
        let prediction = engine.predict_image_bytes(&png_bytes());
        assert_eq!(prediction.sign, "A");
        assert!((prediction.confidence - 0.95).abs() < 1e-6);
        assert_eq!(factory.camera_opens.load(Ordering::SeqCst), 0);
        assert_eq!(engine.get_stable_prediction().sign, "Ready...");
    }

    #[test]
    fn single_frame_threshold_is_independent() {
        let factory = Arc::new(FakeFactory::new(
            vec![0.7, 0.2, 0.1],
            crate::recognition::testing::FakeDetector::with_hand(
                crate::recognition::testing::open_hand(),
            ),
        ));
        let settings = EngineSettings {
            camera: CameraMode::Disabled,
            single_frame_min_confidence: 0.5,
            ..EngineSettings::default()
        };
        let engine = RecognitionEngine::new(factory.clone(), settings);
        let image = RgbImage::new(8, 8);
        assert_eq!(engine.predict_single_frame(&image).sign, "A");

        factory.model.set(vec![0.4, 0.3, 0.3]);
        assert_eq!(
            engine.predict_single_frame(&image),
            Prediction::new("Low Confidence", 0.0)
        );
    }

    #[test]
    fn undecodable_payload_is_reported_as_no_image() {
        let factory = Arc::new(FakeFactory::confident());
        let engine = engine(&factory);
        assert_eq!(engine.predict_image_bytes(&[]).sign, "Error: No image provided");
        assert_eq!(
            engine.predict_image_bytes(b"not an image").sign,
            "Error: No image provided"
        );
    }

    #[test]
    fn missing_artifacts_yield_initialization_error() {
        let factory = Arc::new(FakeFactory::confident());
        factory.missing_labels.store(true, Ordering::SeqCst);
        let engine = engine(&factory);
        assert_eq!(
            engine.predict_single_frame(&RgbImage::new(8, 8)),
            Prediction::new("Initialization Error", 0.0)
        );
    }

    #[test]
    fn data_urls_are_decoded() {
        let encoded = STANDARD.encode(b"hello");
        assert_eq!(
            decode_data_url(&format!("data:image/jpeg;base64,{encoded}")).unwrap(),
            b"hello"
        );
        assert_eq!(decode_data_url(&encoded).unwrap(), b"hello");
        assert_eq!(
            decode_data_url("data:image/png,raw").unwrap_err(),
            DataUrlError::NotBase64
        );
        assert_eq!(
            decode_data_url("data:image/png;base64").unwrap_err(),
            DataUrlError::NotDataUrl
        );
        assert_eq!(
            decode_data_url("data:image/png;base64,@@@").unwrap_err(),
            DataUrlError::Decode
        );
    }
}
