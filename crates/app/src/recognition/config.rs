use std::{path::PathBuf, time::Duration};

use anyhow::{Result, bail};
use clap::{Args, ValueEnum, builder::FalseyValueParser};
use ml_core::{DType, SidecarConfig, TensorSpec};
use video_ingest::CameraSpec;

pub const DEFAULT_BUFFER_CAPACITY: usize = 10;
pub const DEFAULT_SMOOTHING_THRESHOLD: f32 = 0.9;
pub const DEFAULT_HOLD_SECS: f64 = 1.5;
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.80;
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Whether the engine may open a capture device at all.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CameraMode {
    Device(String),
    Disabled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ModelBackend {
    /// Linear softmax model stored as JSON.
    Dense,
    /// TorchScript module (requires the `with-tch` feature).
    Torchscript,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum DetectorBackend {
    /// MediaPipe hand landmarker running in a helper process.
    MediapipeSidecar,
    /// TorchScript landmark regressor (requires the `with-tch` feature).
    Torchscript,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum InputDType {
    Float32,
    Float64,
}

impl From<InputDType> for DType {
    fn from(value: InputDType) -> Self {
        match value {
            InputDType::Float32 => DType::Float32,
            InputDType::Float64 => DType::Float64,
        }
    }
}

/// Tunables shared by the lifecycle manager, the stream and the single-frame
/// service.
#[derive(Clone, Debug)]
pub struct EngineSettings {
    pub buffer_capacity: usize,
    pub smoothing_threshold: f32,
    pub hold_duration: Duration,
    pub stream_min_confidence: f32,
    pub single_frame_min_confidence: f32,
    pub jpeg_quality: u8,
    pub camera: CameraMode,
    pub capture_size: (i32, i32),
    pub capture_fps: f64,
    pub camera_retry_delay: Duration,
    pub placeholder_interval: Duration,
    pub empty_read_backoff: Duration,
    pub mirror: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            smoothing_threshold: DEFAULT_SMOOTHING_THRESHOLD,
            hold_duration: Duration::from_secs_f64(DEFAULT_HOLD_SECS),
            stream_min_confidence: DEFAULT_MIN_CONFIDENCE,
            single_frame_min_confidence: DEFAULT_MIN_CONFIDENCE,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            camera: CameraMode::Device("0".to_string()),
            capture_size: (
                video_ingest::DEFAULT_CAPTURE_WIDTH,
                video_ingest::DEFAULT_CAPTURE_HEIGHT,
            ),
            capture_fps: 30.0,
            camera_retry_delay: Duration::from_secs(1),
            placeholder_interval: Duration::from_secs(1),
            empty_read_backoff: Duration::from_millis(10),
            mirror: true,
        }
    }
}

impl EngineSettings {
    /// Capture device description, or `None` when the camera is disabled.
    pub fn camera_spec(&self) -> Option<CameraSpec> {
        match &self.camera {
            CameraMode::Device(uri) => Some(CameraSpec {
                uri: uri.clone(),
                size: self.capture_size,
                fps: self.capture_fps,
            }),
            CameraMode::Disabled => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_capacity == 0 {
            bail!("buffer capacity must be at least 1");
        }
        for (name, value) in [
            ("smoothing threshold", self.smoothing_threshold),
            ("stream minimum confidence", self.stream_min_confidence),
            ("single-frame minimum confidence", self.single_frame_min_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("{name} must be between 0 and 1, got {value}");
            }
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            bail!("JPEG quality must be between 1 and 100");
        }
        if self.capture_size.0 <= 0 || self.capture_size.1 <= 0 {
            bail!("capture size must be positive");
        }
        if self.capture_fps <= 0.0 {
            bail!("capture fps must be positive");
        }
        Ok(())
    }
}

/// Where the engine finds its models and how it builds its detector.
#[derive(Clone, Debug)]
pub struct ArtifactConfig {
    pub model_path: PathBuf,
    pub labels_path: PathBuf,
    pub model_backend: ModelBackend,
    /// Declared input layout, used by backends that cannot report their own.
    pub model_input: TensorSpec,
    pub detector_backend: DetectorBackend,
    pub sidecar: SidecarConfig,
    pub detector_model: Option<PathBuf>,
    pub detector_input_size: (u32, u32),
}

/// Engine options shared by every subcommand.
#[derive(Args, Clone, Debug)]
pub struct EngineArgs {
    /// Classifier artifact.
    #[arg(long, env = "SIGNSIGHT_MODEL", default_value = "models/sign_model.json")]
    pub model: PathBuf,
    /// Label manifest (`.json` with `class_names`, or one label per line).
    #[arg(long, env = "SIGNSIGHT_LABELS", default_value = "models/labels.json")]
    pub labels: PathBuf,
    #[arg(long, value_enum, env = "SIGNSIGHT_MODEL_BACKEND", default_value_t = ModelBackend::Dense)]
    pub model_backend: ModelBackend,
    /// Input shape for TorchScript classifiers, comma separated.
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true, default_value = "-1,42")]
    pub model_input_shape: Vec<i64>,
    #[arg(long, value_enum, default_value_t = InputDType::Float32)]
    pub model_input_dtype: InputDType,
    #[arg(long, value_enum, env = "SIGNSIGHT_DETECTOR", default_value_t = DetectorBackend::MediapipeSidecar)]
    pub detector: DetectorBackend,
    /// Interpreter used to launch the MediaPipe helper.
    #[arg(long, env = "SIGNSIGHT_DETECTOR_PYTHON", default_value = "python3")]
    pub detector_python: PathBuf,
    /// MediaPipe helper script.
    #[arg(long, env = "SIGNSIGHT_DETECTOR_SCRIPT", default_value = "scripts/hand_detect.py")]
    pub detector_script: PathBuf,
    /// TorchScript hand landmark model.
    #[arg(long, env = "SIGNSIGHT_DETECTOR_MODEL")]
    pub detector_model: Option<PathBuf>,
    #[arg(long, default_value_t = 224)]
    pub detector_input_size: u32,
    /// Hands scored below this by the detector are ignored.
    #[arg(long, default_value_t = 0.6)]
    pub min_hand_score: f32,
    /// Camera index or URI.
    #[arg(long, env = "SIGNSIGHT_CAMERA", default_value = "0")]
    pub camera: String,
    /// Never open a camera; the stream serves a placeholder instead.
    #[arg(long, env = "NO_CAMERA", value_parser = FalseyValueParser::new())]
    pub no_camera: bool,
    #[arg(long, default_value_t = video_ingest::DEFAULT_CAPTURE_WIDTH)]
    pub width: i32,
    #[arg(long, default_value_t = video_ingest::DEFAULT_CAPTURE_HEIGHT)]
    pub height: i32,
    #[arg(long, default_value_t = 30.0)]
    pub fps: f64,
    /// Do not mirror camera frames before detection.
    #[arg(long)]
    pub no_mirror: bool,
    #[arg(long, default_value_t = DEFAULT_BUFFER_CAPACITY)]
    pub buffer_capacity: usize,
    #[arg(long, default_value_t = DEFAULT_SMOOTHING_THRESHOLD)]
    pub smoothing_threshold: f32,
    /// Seconds a stable sign is held after its majority fades.
    #[arg(long, default_value_t = DEFAULT_HOLD_SECS)]
    pub hold_secs: f64,
    #[arg(long, default_value_t = DEFAULT_MIN_CONFIDENCE)]
    pub min_confidence: f32,
    #[arg(long, default_value_t = DEFAULT_MIN_CONFIDENCE)]
    pub single_frame_min_confidence: f32,
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY)]
    pub jpeg_quality: u8,
}

/// Validated settings plus artifact locations.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub settings: EngineSettings,
    pub artifacts: ArtifactConfig,
}

impl TryFrom<EngineArgs> for EngineConfig {
    type Error = anyhow::Error;

    fn try_from(args: EngineArgs) -> Result<Self> {
        if !args.hold_secs.is_finite() || args.hold_secs < 0.0 {
            bail!("--hold-secs must be a non-negative number");
        }
        if !(0.0..=1.0).contains(&args.min_hand_score) {
            bail!("--min-hand-score must be between 0 and 1");
        }
        if args.detector_input_size == 0 {
            bail!("--detector-input-size must be positive");
        }
        if args.detector == DetectorBackend::Torchscript && args.detector_model.is_none() {
            bail!("--detector torchscript requires --detector-model");
        }

        let settings = EngineSettings {
            buffer_capacity: args.buffer_capacity,
            smoothing_threshold: args.smoothing_threshold,
            hold_duration: Duration::from_secs_f64(args.hold_secs),
            stream_min_confidence: args.min_confidence,
            single_frame_min_confidence: args.single_frame_min_confidence,
            jpeg_quality: args.jpeg_quality,
            camera: if args.no_camera {
                CameraMode::Disabled
            } else {
                CameraMode::Device(args.camera)
            },
            capture_size: (args.width, args.height),
            capture_fps: args.fps,
            mirror: !args.no_mirror,
            ..EngineSettings::default()
        };
        settings.validate()?;

        let model_input = TensorSpec::new(args.model_input_shape, args.model_input_dtype.into());
        if let Err(err) = model_input.validate() {
            bail!("--model-input-shape: {err}");
        }

        let mut sidecar = SidecarConfig::new(args.detector_python).arg(args.detector_script);
        sidecar.min_hand_score = args.min_hand_score;

        Ok(Self {
            settings,
            artifacts: ArtifactConfig {
                model_path: args.model,
                labels_path: args.labels,
                model_backend: args.model_backend,
                model_input,
                detector_backend: args.detector,
                sidecar,
                detector_model: args.detector_model,
                detector_input_size: (args.detector_input_size, args.detector_input_size),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        engine: EngineArgs,
    }

    fn parse(args: &[&str]) -> Result<EngineConfig> {
        let argv = std::iter::once("signsight").chain(args.iter().copied());
        let harness = Harness::try_parse_from(argv)?;
        EngineConfig::try_from(harness.engine)
    }

    #[test]
    fn defaults_match_engine_settings() {
        let config = parse(&["--camera", "0"]).unwrap();
        let defaults = EngineSettings::default();
        assert_eq!(config.settings.buffer_capacity, defaults.buffer_capacity);
        assert_eq!(config.settings.hold_duration, Duration::from_millis(1500));
        assert_eq!(config.settings.jpeg_quality, 85);
        assert!(config.settings.mirror);
        assert_eq!(config.artifacts.model_input.shape, vec![-1, 42]);
        assert_eq!(config.artifacts.model_backend, ModelBackend::Dense);
    }

    #[test]
    fn no_camera_flag_disables_capture() {
        let config = parse(&["--no-camera"]).unwrap();
        assert_eq!(config.settings.camera, CameraMode::Disabled);
        assert!(config.settings.camera_spec().is_none());
    }

    #[test]
    fn camera_spec_carries_capture_format() {
        let config = parse(&["--camera", "/dev/video2", "--width", "320", "--height", "240"]).unwrap();
        let spec = config.settings.camera_spec().unwrap();
        assert_eq!(spec.uri, "/dev/video2");
        assert_eq!(spec.size, (320, 240));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert!(parse(&["--smoothing-threshold", "1.5"]).is_err());
        assert!(parse(&["--jpeg-quality", "0"]).is_err());
        assert!(parse(&["--width", "-4"]).is_err());
        assert!(parse(&["--buffer-capacity", "0"]).is_err());
        assert!(parse(&["--hold-secs", "-1"]).is_err());
        assert!(parse(&["--model-input-shape", "1,-1"]).is_err());
        assert!(parse(&["--detector", "torchscript"]).is_err());
    }
}
