//! TorchScript backends for the classifier and the hand landmark detector.
//! Enable the `with-tch` feature in `ml-core` to pull in the `tch` crate.

use std::{convert::TryFrom, path::Path, sync::Mutex};

use image::{RgbImage, imageops::FilterType};
use tch::{self, Device, IValue, Kind, Tensor};
use tracing::debug;

use crate::{
    detector::HandDetector,
    landmarks::{LandmarkSet, Point2},
    model::{DType, ModelError, SignModel, TensorData, TensorSpec},
};

fn tch_err(err: tch::TchError) -> ModelError {
    ModelError::Inference(err.to_string())
}

fn load_module(path: &Path, device: Device) -> Result<tch::CModule, ModelError> {
    if !path.exists() {
        return Err(ModelError::NotFound {
            path: path.to_path_buf(),
        });
    }
    tch::CModule::load_on_device(path, device).map_err(|err| ModelError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

/// Pick CUDA when available.
pub fn default_device() -> Device {
    Device::cuda_if_available()
}

/// TorchScript sign classifier. TorchScript does not describe its signature,
/// so the tensor layout is supplied by the caller.
pub struct TorchScriptModel {
    module: Mutex<tch::CModule>,
    device: Device,
    input: TensorSpec,
    output: TensorSpec,
}

impl TorchScriptModel {
    pub fn load(
        model_path: impl AsRef<Path>,
        device: Device,
        input: TensorSpec,
        output: TensorSpec,
    ) -> Result<Self, ModelError> {
        input.validate()?;
        output.validate()?;
        let module = load_module(model_path.as_ref(), device)?;
        debug!(path = %model_path.as_ref().display(), ?device, "torchscript classifier loaded");
        Ok(Self {
            module: Mutex::new(module),
            device,
            input,
            output,
        })
    }
}

impl SignModel for TorchScriptModel {
    fn input_spec(&self) -> &TensorSpec {
        &self.input
    }

    fn output_spec(&self) -> &TensorSpec {
        &self.output
    }

    fn infer(&self, input: &TensorData) -> Result<Vec<f32>, ModelError> {
        if !self.input.accepts(input.len()) {
            return Err(ModelError::Shape {
                expected: self.input.shape.clone(),
                actual: input.len(),
            });
        }
        let mut shape: Vec<i64> = self.input.shape.clone();
        if shape.len() > 1 {
            shape[0] = 1;
        }
        let tensor = match input {
            TensorData::F32(values) => Tensor::from_slice(values.as_slice()),
            TensorData::F64(values) => Tensor::from_slice(values.as_slice()),
        }
        .to_device(self.device)
        .view(shape.as_slice());

        let output = self
            .module
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .forward_ts(&[tensor])
            .map_err(tch_err)?;
        let flat = output
            .to_device(Device::Cpu)
            .to_kind(Kind::Float)
            .flatten(0, -1);
        Vec::<f32>::try_from(&flat).map_err(tch_err)
    }

    fn describe(&self) -> String {
        let dtype = match self.input.dtype {
            DType::Float32 => "f32",
            DType::Float64 => "f64",
        };
        format!("torchscript({dtype}, {:?})", self.input.shape)
    }
}

/// TorchScript hand landmark regressor.
///
/// The module takes a `[1, 3, H, W]` float image in `[0, 1]` and returns either
/// a landmark tensor (`[1, 21 * k]` or `[1, 21, k]`, image-relative `x, y` in
/// the first two of `k` columns) or a `(landmarks, presence)` tuple.
pub struct TorchHandDetector {
    module: Mutex<tch::CModule>,
    device: Device,
    input_size: (u32, u32),
    presence_threshold: f32,
}

impl TorchHandDetector {
    pub fn load(
        model_path: impl AsRef<Path>,
        device: Device,
        input_size: (u32, u32),
    ) -> Result<Self, ModelError> {
        let module = load_module(model_path.as_ref(), device)?;
        Ok(Self {
            module: Mutex::new(module),
            device,
            input_size,
            presence_threshold: 0.5,
        })
    }

    /// Override the hand presence threshold used when the module reports one.
    pub fn with_presence_threshold(mut self, threshold: f32) -> Self {
        self.presence_threshold = threshold;
        self
    }

    fn image_to_tensor(&self, image: &RgbImage) -> Tensor {
        let (in_w, in_h) = self.input_size;
        let resized = if image.dimensions() == (in_w, in_h) {
            image.clone()
        } else {
            image::imageops::resize(image, in_w, in_h, FilterType::Triangle)
        };
        Tensor::from_slice(resized.as_raw())
            .to_device(self.device)
            .to_kind(Kind::Float)
            .view([1, i64::from(in_h), i64::from(in_w), 3])
            .permute([0, 3, 1, 2])
            / 255.0
    }
}

impl HandDetector for TorchHandDetector {
    fn detect(&self, image: &RgbImage) -> Result<Option<LandmarkSet>, ModelError> {
        let input = self.image_to_tensor(image);
        let output = self
            .module
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .forward_is(&[IValue::Tensor(input)])
            .map_err(|err| ModelError::Detector(err.to_string()))?;

        let landmarks = match output {
            IValue::Tensor(landmarks) => landmarks,
            IValue::Tuple(mut values) if values.len() == 2 => {
                let presence = match values.pop() {
                    Some(IValue::Tensor(score)) => score.double_value(&[]) as f32,
                    Some(IValue::Double(score)) => score as f32,
                    _ => return Err(ModelError::Detector("unexpected presence output".into())),
                };
                if presence < self.presence_threshold {
                    return Ok(None);
                }
                match values.pop() {
                    Some(IValue::Tensor(landmarks)) => landmarks,
                    _ => return Err(ModelError::Detector("unexpected landmark output".into())),
                }
            }
            other => {
                return Err(ModelError::Detector(format!(
                    "unexpected detector output: {other:?}"
                )));
            }
        };

        let flat = landmarks
            .to_device(Device::Cpu)
            .to_kind(Kind::Float)
            .flatten(0, -1);
        let values = Vec::<f32>::try_from(&flat)
            .map_err(|err| ModelError::Detector(err.to_string()))?;
        if values.is_empty() || values.len() % 21 != 0 {
            return Err(ModelError::Detector(format!(
                "landmark output has {} values",
                values.len()
            )));
        }
        let stride = values.len() / 21;
        if stride < 2 {
            return Err(ModelError::Detector("landmarks need x and y".into()));
        }
        let points = values
            .chunks_exact(stride)
            .map(|c| Point2::new(c[0], c[1]))
            .collect();
        Ok(Some(LandmarkSet::new(points)))
    }

    fn describe(&self) -> String {
        format!(
            "torchscript-hands({}x{})",
            self.input_size.0, self.input_size.1
        )
    }
}
