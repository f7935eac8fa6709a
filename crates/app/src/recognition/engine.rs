//! The recognition engine: one owned context holding the resource bundle,
//! the stabiliser and the cancellation token.
//!
//! Lock order is bundle, then stabiliser. The token lock is never held while
//! waiting on either of them.

use std::sync::{
    Arc, Mutex, MutexGuard,
    atomic::{AtomicBool, Ordering},
};

use ml_core::FrameLabel;
use tracing::{debug, error, info, info_span, warn};

use crate::recognition::{
    config::EngineSettings,
    data::Prediction,
    lifecycle::{
        CameraExpectation, CameraStatus, CancellationToken, EngineError, InferenceHandles,
        ResourceBundle, ResourceFactory, SharedCamera, close_camera,
    },
    pipeline::FrameStream,
    stabilizer::{StableLabel, Stabilizer},
};

/// Cheaply cloneable handle to a recognition engine.
#[derive(Clone)]
pub struct RecognitionEngine {
    shared: Arc<EngineShared>,
}

struct EngineShared {
    factory: Arc<dyn ResourceFactory>,
    settings: EngineSettings,
    bundle: Mutex<ResourceBundle>,
    stabilizer: Mutex<Stabilizer>,
    token: Mutex<CancellationToken>,
    /// Set by `release`, cleared by the next successful acquire.
    released: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RecognitionEngine {
    pub fn new(factory: Arc<dyn ResourceFactory>, settings: EngineSettings) -> Self {
        let stabilizer = Stabilizer::new(
            settings.buffer_capacity,
            settings.smoothing_threshold,
            settings.hold_duration,
        );
        Self {
            shared: Arc::new(EngineShared {
                factory,
                settings,
                bundle: Mutex::new(ResourceBundle::default()),
                stabilizer: Mutex::new(stabilizer),
                token: Mutex::new(CancellationToken::new()),
                released: AtomicBool::new(false),
            }),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.shared.settings
    }

    /// Load everything including the camera. Used at server start and when a
    /// session begins.
    pub fn initialize(&self) -> Result<CameraStatus, EngineError> {
        self.acquire(CameraExpectation::Required)
    }

    /// Idempotent acquire. Concurrent callers are serialised on the bundle
    /// lock; resources are created at most once until the next release.
    pub fn acquire(&self, expectation: CameraExpectation) -> Result<CameraStatus, EngineError> {
        self.acquire_inner(expectation, None)
    }

    /// Acquire on behalf of a running stream. Fails with
    /// [`EngineError::Cancelled`] if the stream's token was cancelled, so a
    /// stream outliving a release cannot resurrect the engine.
    pub(crate) fn acquire_inner(
        &self,
        expectation: CameraExpectation,
        stream_token: Option<&CancellationToken>,
    ) -> Result<CameraStatus, EngineError> {
        let shared = &self.shared;
        let mut bundle = lock(&shared.bundle);
        if stream_token.is_some_and(CancellationToken::is_cancelled) {
            return Err(EngineError::Cancelled);
        }

        let camera_spec = shared.settings.camera_spec();
        let camera_wanted = expectation == CameraExpectation::Required && camera_spec.is_some();
        if bundle.initialized && (!camera_wanted || bundle.camera_is_open()) {
            return Ok(camera_status(&bundle, camera_spec.is_some()));
        }

        let span = info_span!("engine.acquire", ?expectation);
        let _entered = span.enter();

        {
            let mut token = lock(&shared.token);
            if token.is_cancelled() {
                debug!("installing fresh cancellation token");
                *token = CancellationToken::new();
            }
        }

        if let Err(err) = bundle.load_missing(shared.factory.as_ref()) {
            let stale = bundle.teardown();
            let (label, err) = if err.is_missing_artifact() {
                (StableLabel::FileMissing, EngineError::ArtifactMissing(err))
            } else {
                (StableLabel::InitFailed, EngineError::InitFailed(err))
            };
            lock(&shared.stabilizer).set(label);
            drop(bundle);
            close_camera(stale);
            metrics::counter!("signsight_acquire_total", "outcome" => "failed").increment(1);
            error!("recognition engine failed to initialise: {err}");
            return Err(err);
        }

        let mut stale = None;
        let status = match camera_spec {
            None => {
                stale = bundle.camera.take();
                CameraStatus::Disabled
            }
            Some(spec) if camera_wanted => {
                if bundle.camera_is_open() {
                    CameraStatus::Open
                } else {
                    stale = bundle.camera.take();
                    match shared.factory.open_camera(&spec) {
                        Ok(source) => {
                            info!(camera = %source.describe(), "camera opened");
                            bundle.camera = Some(Arc::new(Mutex::new(source)));
                            CameraStatus::Open
                        }
                        Err(err) => {
                            warn!(uri = %spec.uri, "camera unavailable: {err}");
                            CameraStatus::Unavailable
                        }
                    }
                }
            }
            Some(_) => camera_status(&bundle, true),
        };

        bundle.initialized = true;
        shared.released.store(false, Ordering::SeqCst);
        lock(&shared.stabilizer).reset_ready();
        drop(bundle);
        close_camera(stale);

        metrics::counter!("signsight_acquire_total", "outcome" => "ok").increment(1);
        info!(?status, "recognition engine ready");
        Ok(status)
    }

    /// Cancel running streams, then close the detector and the camera. Safe to
    /// call repeatedly.
    pub fn release(&self) {
        let shared = &self.shared;
        shared.released.store(true, Ordering::SeqCst);
        lock(&shared.token).cancel();

        let camera = {
            let mut bundle = lock(&shared.bundle);
            let was_initialized = bundle.initialized;
            let camera = bundle.teardown();
            lock(&shared.stabilizer).set(StableLabel::Offline);
            if was_initialized {
                info!("recognition engine released");
            }
            camera
        };
        close_camera(camera);
        metrics::counter!("signsight_release_total").increment(1);
    }

    pub fn is_initialized(&self) -> bool {
        lock(&self.shared.bundle).initialized
    }

    /// The token live streams observe.
    pub fn cancellation_token(&self) -> CancellationToken {
        lock(&self.shared.token).clone()
    }

    /// Token for a stream that never acquires; replaces a cancelled token the
    /// way an acquire would.
    pub(crate) fn stream_token(&self) -> CancellationToken {
        let mut token = lock(&self.shared.token);
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
        token.clone()
    }

    /// Current stable label and its confidence. Lazily initialises (without a
    /// camera) unless the engine was released.
    pub fn get_stable_prediction(&self) -> Prediction {
        if !self.is_initialized() && !self.shared.released.load(Ordering::SeqCst) {
            if let Err(err) = self.acquire(CameraExpectation::NotNeeded) {
                debug!("lazy initialisation failed: {err}");
            }
        }
        lock(&self.shared.stabilizer).prediction()
    }

    /// Ordered class labels; empty when the label manifest cannot be loaded.
    pub fn get_available_signs(&self) -> Vec<String> {
        if !self.is_initialized() {
            if let Err(err) = self.acquire(CameraExpectation::NotNeeded) {
                warn!("sign list unavailable: {err}");
            }
        }
        lock(&self.shared.bundle).labels.as_ref().clone()
    }

    /// Lazy annotated-frame sequence for one viewer. See [`FrameStream`].
    pub fn stream_frames(&self) -> FrameStream {
        FrameStream::new(self.clone())
    }

    pub(crate) fn inference_handles(&self) -> Option<InferenceHandles> {
        lock(&self.shared.bundle).handles()
    }

    pub(crate) fn camera_handle(&self) -> Option<SharedCamera> {
        let bundle = lock(&self.shared.bundle);
        if bundle.camera_is_open() {
            bundle.camera.clone()
        } else {
            None
        }
    }

    /// Feed one instantaneous result into the stabiliser.
    pub(crate) fn observe_frame(
        &self,
        label: FrameLabel,
        confidence: f32,
    ) -> (StableLabel, Prediction) {
        let mut stabilizer = lock(&self.shared.stabilizer);
        let stable = stabilizer
            .observe(label, confidence, std::time::Instant::now())
            .clone();
        (stable, stabilizer.prediction())
    }

    pub(crate) fn set_stable(&self, label: StableLabel) {
        lock(&self.shared.stabilizer).set(label);
    }

    pub(crate) fn stable_prediction(&self) -> Prediction {
        lock(&self.shared.stabilizer).prediction()
    }

    /// Close the camera without touching models or the stable label.
    pub(crate) fn release_camera_device(&self) {
        let camera = lock(&self.shared.bundle).camera.take();
        close_camera(camera);
    }
}

fn camera_status(bundle: &ResourceBundle, camera_configured: bool) -> CameraStatus {
    if !camera_configured {
        CameraStatus::Disabled
    } else if bundle.camera_is_open() {
        CameraStatus::Open
    } else {
        CameraStatus::Unavailable
    }
}
