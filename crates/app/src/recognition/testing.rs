//! In-memory collaborators for unit tests.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use image::RgbImage;
use ml_core::{
    DType, HandDetector, LandmarkSet, ModelError, Point2, SignModel, TensorData, TensorSpec,
};
use video_ingest::{CameraSpec, CaptureError, Frame, FrameFormat, FrameSource};

use crate::recognition::lifecycle::ResourceFactory;

/// A plausible open hand: wrist at the bottom, fingers fanned upwards.
pub(crate) fn open_hand() -> LandmarkSet {
    let points = (0..21)
        .map(|i| {
            let finger = i.max(1) as f32 / 4.0;
            Point2::new(0.3 + 0.02 * finger, 0.8 - 0.025 * i as f32)
        })
        .collect();
    LandmarkSet::new(points)
}

pub(crate) struct FakeModel {
    input: TensorSpec,
    output: TensorSpec,
    probabilities: Mutex<Vec<f32>>,
}

impl FakeModel {
    pub(crate) fn new(probabilities: Vec<f32>) -> Self {
        Self {
            input: TensorSpec::new(vec![-1, 42], DType::Float32),
            output: TensorSpec::new(vec![-1, probabilities.len() as i64], DType::Float32),
            probabilities: Mutex::new(probabilities),
        }
    }

    pub(crate) fn set(&self, probabilities: Vec<f32>) {
        *self.probabilities.lock().unwrap() = probabilities;
    }
}

impl SignModel for FakeModel {
    fn input_spec(&self) -> &TensorSpec {
        &self.input
    }

    fn output_spec(&self) -> &TensorSpec {
        &self.output
    }

    fn infer(&self, _input: &TensorData) -> Result<Vec<f32>, ModelError> {
        Ok(self.probabilities.lock().unwrap().clone())
    }
}

pub(crate) struct FakeDetector {
    hand: Mutex<Option<LandmarkSet>>,
    fail: AtomicBool,
}

impl FakeDetector {
    pub(crate) fn with_hand(hand: LandmarkSet) -> Self {
        Self {
            hand: Mutex::new(Some(hand)),
            fail: AtomicBool::new(false),
        }
    }

    pub(crate) fn empty() -> Self {
        Self {
            hand: Mutex::new(None),
            fail: AtomicBool::new(false),
        }
    }

    pub(crate) fn failing() -> Self {
        let detector = Self::empty();
        detector.fail.store(true, Ordering::SeqCst);
        detector
    }
}

impl HandDetector for FakeDetector {
    fn detect(&self, _image: &RgbImage) -> Result<Option<LandmarkSet>, ModelError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ModelError::Detector("fake failure".into()));
        }
        Ok(self.hand.lock().unwrap().clone())
    }
}

/// Camera producing solid grey frames. Shares its counters with the factory.
pub(crate) struct FakeCamera {
    opened: bool,
    frames_left: Option<usize>,
    reads: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
}

impl FrameSource for FakeCamera {
    fn read(&mut self) -> Result<Option<Frame>, CaptureError> {
        if !self.opened {
            return Err(CaptureError::Closed { uri: "fake".into() });
        }
        if let Some(left) = self.frames_left.as_mut() {
            if *left == 0 {
                self.opened = false;
                return Err(CaptureError::Closed { uri: "fake".into() });
            }
            *left -= 1;
        }
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(Some(Frame {
            data: vec![128; 64 * 48 * 3],
            width: 64,
            height: 48,
            timestamp_ms: 0,
            format: FrameFormat::Bgr8,
        }))
    }

    fn is_opened(&self) -> bool {
        self.opened
    }

    fn release(&mut self) {
        if self.opened {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
        self.opened = false;
    }

    fn describe(&self) -> String {
        "fake-camera".into()
    }
}

/// Factory that hands out shared fakes and counts every creation.
pub(crate) struct FakeFactory {
    pub(crate) model: Arc<FakeModel>,
    pub(crate) detector: Arc<FakeDetector>,
    pub(crate) label_loads: AtomicUsize,
    pub(crate) classifier_loads: AtomicUsize,
    pub(crate) detector_creates: AtomicUsize,
    pub(crate) camera_opens: AtomicUsize,
    pub(crate) camera_reads: Arc<AtomicUsize>,
    pub(crate) camera_releases: Arc<AtomicUsize>,
    pub(crate) missing_labels: AtomicBool,
    pub(crate) broken_classifier: AtomicBool,
    pub(crate) camera_fails: AtomicBool,
    /// Frames each opened camera yields before it reports itself closed.
    pub(crate) frames_per_camera: Mutex<Option<usize>>,
}

impl FakeFactory {
    pub(crate) fn new(probabilities: Vec<f32>, detector: FakeDetector) -> Self {
        Self {
            model: Arc::new(FakeModel::new(probabilities)),
            detector: Arc::new(detector),
            label_loads: AtomicUsize::new(0),
            classifier_loads: AtomicUsize::new(0),
            detector_creates: AtomicUsize::new(0),
            camera_opens: AtomicUsize::new(0),
            camera_reads: Arc::new(AtomicUsize::new(0)),
            camera_releases: Arc::new(AtomicUsize::new(0)),
            missing_labels: AtomicBool::new(false),
            broken_classifier: AtomicBool::new(false),
            camera_fails: AtomicBool::new(false),
            frames_per_camera: Mutex::new(None),
        }
    }

    /// Confident "A" on every frame with a visible hand.
    pub(crate) fn confident() -> Self {
        Self::new(vec![0.95, 0.03, 0.02], FakeDetector::with_hand(open_hand()))
    }
}

impl ResourceFactory for FakeFactory {
    fn load_labels(&self) -> Result<Vec<String>, ModelError> {
        self.label_loads.fetch_add(1, Ordering::SeqCst);
        if self.missing_labels.load(Ordering::SeqCst) {
            return Err(ModelError::NotFound {
                path: "labels.json".into(),
            });
        }
        Ok(vec!["A".into(), "B".into(), "C".into()])
    }

    fn load_classifier(&self, _class_count: usize) -> Result<Arc<dyn SignModel>, ModelError> {
        self.classifier_loads.fetch_add(1, Ordering::SeqCst);
        if self.broken_classifier.load(Ordering::SeqCst) {
            return Err(ModelError::Parse {
                path: "model.json".into(),
                message: "truncated".into(),
            });
        }
        Ok(self.model.clone())
    }

    fn create_detector(&self) -> Result<Arc<dyn HandDetector>, ModelError> {
        self.detector_creates.fetch_add(1, Ordering::SeqCst);
        Ok(self.detector.clone())
    }

    fn open_camera(&self, spec: &CameraSpec) -> Result<Box<dyn FrameSource>, CaptureError> {
        self.camera_opens.fetch_add(1, Ordering::SeqCst);
        if self.camera_fails.load(Ordering::SeqCst) {
            return Err(CaptureError::Open {
                uri: spec.uri.clone(),
            });
        }
        Ok(Box::new(FakeCamera {
            opened: true,
            frames_left: *self.frames_per_camera.lock().unwrap(),
            reads: self.camera_reads.clone(),
            releases: self.camera_releases.clone(),
        }))
    }
}
