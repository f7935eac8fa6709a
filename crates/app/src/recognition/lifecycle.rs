//! Ownership of the heavy recognition resources.
//!
//! The classifier and label list are loaded once and survive a release or a
//! failed acquire; the hand detector and the camera are torn down and
//! recreated on the next acquire. Creation always goes through a [`ResourceFactory`], which is
//! how the command line wires real artifacts and how tests count creations.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use ml_core::{
    DenseModel, HandDetector, ModelError, SidecarHandDetector, SignModel, TensorSpec, load_labels,
};
use thiserror::Error;
use tracing::{debug, warn};
use video_ingest::{CameraSpec, CaptureError, FrameSource};

use crate::recognition::config::{ArtifactConfig, DetectorBackend, ModelBackend};

/// Whether the caller needs a live camera.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CameraExpectation {
    /// Open the camera if the engine is configured with one.
    Required,
    /// Never open a camera; single-frame work and label queries.
    NotNeeded,
}

/// Camera state reported by a successful acquire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CameraStatus {
    Open,
    Disabled,
    Unavailable,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("required artifact is missing: {0}")]
    ArtifactMissing(#[source] ModelError),
    #[error("failed to initialise recognition resources: {0}")]
    InitFailed(#[source] ModelError),
    #[error("acquire abandoned after cancellation")]
    Cancelled,
}

/// Cooperative stop signal shared between the engine and its streams.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, waking early on cancellation. Returns `false` if
    /// the token was cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(Duration::from_millis(20)));
        }
    }
}

/// Builds the engine's collaborators.
pub trait ResourceFactory: Send + Sync {
    fn load_labels(&self) -> Result<Vec<String>, ModelError>;

    /// Load the classifier; `class_count` is the number of labels loaded.
    fn load_classifier(&self, class_count: usize) -> Result<Arc<dyn SignModel>, ModelError>;

    fn create_detector(&self) -> Result<Arc<dyn HandDetector>, ModelError>;

    fn open_camera(&self, spec: &CameraSpec) -> Result<Box<dyn FrameSource>, CaptureError>;
}

/// Factory backed by files on disk and the configured backends.
pub struct ArtifactFactory {
    config: ArtifactConfig,
}

impl ArtifactFactory {
    pub fn new(config: ArtifactConfig) -> Self {
        Self { config }
    }
}

impl ResourceFactory for ArtifactFactory {
    fn load_labels(&self) -> Result<Vec<String>, ModelError> {
        load_labels(&self.config.labels_path)
    }

    fn load_classifier(&self, class_count: usize) -> Result<Arc<dyn SignModel>, ModelError> {
        match self.config.model_backend {
            ModelBackend::Dense => Ok(Arc::new(DenseModel::load(&self.config.model_path)?)),
            ModelBackend::Torchscript => load_torch_classifier(&self.config, class_count),
        }
    }

    fn create_detector(&self) -> Result<Arc<dyn HandDetector>, ModelError> {
        match self.config.detector_backend {
            DetectorBackend::MediapipeSidecar => {
                Ok(Arc::new(SidecarHandDetector::spawn(&self.config.sidecar)?))
            }
            DetectorBackend::Torchscript => load_torch_detector(&self.config),
        }
    }

    fn open_camera(&self, spec: &CameraSpec) -> Result<Box<dyn FrameSource>, CaptureError> {
        video_ingest::open_camera(spec)
    }
}

#[cfg(feature = "with-tch")]
fn load_torch_classifier(
    config: &ArtifactConfig,
    class_count: usize,
) -> Result<Arc<dyn SignModel>, ModelError> {
    use ml_core::{DType, torch};
    let output = TensorSpec::new(vec![-1, class_count.max(1) as i64], DType::Float32);
    Ok(Arc::new(torch::TorchScriptModel::load(
        &config.model_path,
        torch::default_device(),
        config.model_input.clone(),
        output,
    )?))
}

#[cfg(not(feature = "with-tch"))]
fn load_torch_classifier(
    _config: &ArtifactConfig,
    _class_count: usize,
) -> Result<Arc<dyn SignModel>, ModelError> {
    Err(ModelError::Invalid(
        "TorchScript classifier requested but built without the `with-tch` feature".into(),
    ))
}

#[cfg(feature = "with-tch")]
fn load_torch_detector(config: &ArtifactConfig) -> Result<Arc<dyn HandDetector>, ModelError> {
    use ml_core::torch;
    let path = config
        .detector_model
        .as_ref()
        .ok_or_else(|| ModelError::Invalid("no TorchScript hand model configured".into()))?;
    Ok(Arc::new(
        torch::TorchHandDetector::load(path, torch::default_device(), config.detector_input_size)?
            .with_presence_threshold(config.sidecar.min_hand_score),
    ))
}

#[cfg(not(feature = "with-tch"))]
fn load_torch_detector(_config: &ArtifactConfig) -> Result<Arc<dyn HandDetector>, ModelError> {
    Err(ModelError::Invalid(
        "TorchScript hand detector requested but built without the `with-tch` feature".into(),
    ))
}

pub(crate) type SharedCamera = Arc<Mutex<Box<dyn FrameSource>>>;

/// Cloned handles needed for one inference, taken out from under the lock.
#[derive(Clone)]
pub(crate) struct InferenceHandles {
    pub(crate) classifier: Arc<dyn SignModel>,
    pub(crate) labels: Arc<Vec<String>>,
    pub(crate) detector: Arc<dyn HandDetector>,
}

/// Everything the engine loads, guarded by the engine's bundle lock.
#[derive(Default)]
pub(crate) struct ResourceBundle {
    pub(crate) classifier: Option<Arc<dyn SignModel>>,
    pub(crate) labels: Arc<Vec<String>>,
    pub(crate) detector: Option<Arc<dyn HandDetector>>,
    pub(crate) camera: Option<SharedCamera>,
    pub(crate) initialized: bool,
}

impl ResourceBundle {
    pub(crate) fn handles(&self) -> Option<InferenceHandles> {
        if !self.initialized {
            return None;
        }
        Some(InferenceHandles {
            classifier: self.classifier.clone()?,
            labels: self.labels.clone(),
            detector: self.detector.clone()?,
        })
    }

    /// Whether a camera handle exists and is open. A handle locked by an
    /// in-flight read counts as open.
    pub(crate) fn camera_is_open(&self) -> bool {
        match &self.camera {
            Some(camera) => match camera.try_lock() {
                Ok(source) => source.is_opened(),
                Err(_) => true,
            },
            None => false,
        }
    }

    /// Load whatever is missing: labels, then classifier, then detector.
    pub(crate) fn load_missing(&mut self, factory: &dyn ResourceFactory) -> Result<(), ModelError> {
        if self.labels.is_empty() {
            let labels = factory.load_labels()?;
            debug!(count = labels.len(), "labels loaded");
            self.labels = Arc::new(labels);
        }
        if self.classifier.is_none() {
            let classifier = factory.load_classifier(self.labels.len())?;
            let classes = classifier.output_spec().sample_len();
            if classes != self.labels.len() {
                warn!(
                    classes,
                    labels = self.labels.len(),
                    "classifier output size does not match label count"
                );
            }
            debug!(model = %classifier.describe(), "classifier loaded");
            self.classifier = Some(classifier);
        }
        if self.detector.is_none() {
            let detector = factory.create_detector()?;
            debug!(detector = %detector.describe(), "hand detector ready");
            self.detector = Some(detector);
        }
        Ok(())
    }

    /// Drop the detector and the camera and mark the bundle uninitialised.
    /// Classifier and labels stay loaded. The camera handle is returned so it
    /// can be closed outside the lock.
    pub(crate) fn teardown(&mut self) -> Option<SharedCamera> {
        self.detector = None;
        self.initialized = false;
        self.camera.take()
    }
}

/// Close a camera handle taken out of the bundle.
pub(crate) fn close_camera(camera: Option<SharedCamera>) {
    if let Some(camera) = camera {
        let mut source = camera.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if source.is_opened() {
            debug!(camera = %source.describe(), "closing camera");
        }
        source.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_token_interrupts_sleep() {
        let token = CancellationToken::new();
        assert!(token.sleep(Duration::from_millis(5)));
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        let start = Instant::now();
        assert!(!token.sleep(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn uninitialised_bundle_has_no_handles() {
        let bundle = ResourceBundle::default();
        assert!(bundle.handles().is_none());
        assert!(!bundle.camera_is_open());
    }

    #[test]
    fn artifact_factory_reports_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = ArtifactConfig {
            model_path: dir.path().join("model.json"),
            labels_path: dir.path().join("labels.json"),
            model_backend: ModelBackend::Dense,
            model_input: TensorSpec::new(vec![-1, 42], ml_core::DType::Float32),
            detector_backend: DetectorBackend::MediapipeSidecar,
            sidecar: ml_core::SidecarConfig::new(dir.path().join("missing-python")),
            detector_model: None,
            detector_input_size: (224, 224),
        };
        let factory = ArtifactFactory::new(config);
        assert!(factory.load_labels().unwrap_err().is_missing_artifact());
        assert!(factory.load_classifier(3).err().unwrap().is_missing_artifact());
        assert!(factory.create_detector().is_err());
    }
}
