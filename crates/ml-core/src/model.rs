//! Classifier runtime abstraction and the dense softmax backend.
//!
//! A [`SignModel`] declares the tensor layout it expects and returns one
//! probability per class. The [`DenseModel`] is a single linear layer followed
//! by softmax, loaded from a JSON artifact:
//!
//! ```json
//! {
//!   "input":  {"shape": [-1, 42], "dtype": "float32"},
//!   "output": {"shape": [-1, 3],  "dtype": "float32"},
//!   "weights": [[...42 values...], ...],
//!   "bias": [0.0, 0.0, 0.0]
//! }
//! ```

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("artifact not found: {}", path.display())]
    NotFound { path: PathBuf },
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
    #[error("invalid model: {0}")]
    Invalid(String),
    #[error("input shape mismatch: model expects {expected:?}, got {actual} values")]
    Shape { expected: Vec<i64>, actual: usize },
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("hand detector failed: {0}")]
    Detector(String),
}

impl ModelError {
    /// True when the failure is a missing artifact rather than a bad one.
    pub fn is_missing_artifact(&self) -> bool {
        matches!(self, ModelError::NotFound { .. })
    }
}

/// Read an artifact to a string, mapping a missing file to [`ModelError::NotFound`].
pub(crate) fn read_artifact(path: &Path) -> Result<String, ModelError> {
    fs::read_to_string(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            ModelError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            ModelError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Float32,
    Float64,
}

/// Tensor layout descriptor. `-1` marks a dynamic batch dimension.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorSpec {
    pub shape: Vec<i64>,
    pub dtype: DType,
}

impl TensorSpec {
    pub fn new(shape: Vec<i64>, dtype: DType) -> Self {
        Self { shape, dtype }
    }

    /// Reject empty shapes, zero dims and dynamic dims outside the batch axis.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.shape.is_empty() {
            return Err(ModelError::Invalid("tensor shape is empty".into()));
        }
        for (axis, dim) in self.shape.iter().enumerate() {
            let dynamic_batch = axis == 0 && *dim == -1 && self.shape.len() > 1;
            if *dim <= 0 && !dynamic_batch {
                return Err(ModelError::Invalid(format!(
                    "invalid dimension {dim} at axis {axis} in {:?}",
                    self.shape
                )));
            }
        }
        Ok(())
    }

    /// Dimensions after the batch axis. A rank-1 shape has no batch axis.
    pub fn sample_dims(&self) -> &[i64] {
        if self.shape.len() > 1 {
            &self.shape[1..]
        } else {
            &self.shape
        }
    }

    /// Number of values in one sample.
    pub fn sample_len(&self) -> usize {
        self.sample_dims()
            .iter()
            .map(|d| (*d).max(0) as usize)
            .product()
    }

    /// Whether a single flat sample of `len` values fits this layout.
    pub fn accepts(&self, len: usize) -> bool {
        let batch_ok = self.shape.len() < 2 || matches!(self.shape[0], -1 | 1);
        batch_ok && self.sample_len() == len
    }
}

/// Model input cast to the declared numeric type.
#[derive(Clone, Debug, PartialEq)]
pub enum TensorData {
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl TensorData {
    pub fn cast(values: &[f32], dtype: DType) -> Self {
        match dtype {
            DType::Float32 => TensorData::F32(values.to_vec()),
            DType::Float64 => TensorData::F64(values.iter().map(|v| f64::from(*v)).collect()),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            TensorData::F32(_) => DType::Float32,
            TensorData::F64(_) => DType::Float64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TensorData::F32(v) => v.len(),
            TensorData::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_f64(&self) -> Vec<f64> {
        match self {
            TensorData::F32(v) => v.iter().map(|x| f64::from(*x)).collect(),
            TensorData::F64(v) => v.clone(),
        }
    }
}

/// A loaded sign classifier. Implementations are shared across workers.
pub trait SignModel: Send + Sync {
    fn input_spec(&self) -> &TensorSpec;
    fn output_spec(&self) -> &TensorSpec;

    /// Run one sample through the model and return the class probabilities.
    fn infer(&self, input: &TensorData) -> Result<Vec<f32>, ModelError>;

    fn describe(&self) -> String {
        "model".to_string()
    }
}

#[derive(Deserialize)]
struct DenseArtifact {
    input: TensorSpec,
    output: TensorSpec,
    weights: Vec<Vec<f32>>,
    bias: Vec<f32>,
}

/// Single linear layer with softmax output.
pub struct DenseModel {
    input: TensorSpec,
    output: TensorSpec,
    weights: Vec<Vec<f32>>,
    bias: Vec<f32>,
}

impl DenseModel {
    pub fn new(
        input: TensorSpec,
        output: TensorSpec,
        weights: Vec<Vec<f32>>,
        bias: Vec<f32>,
    ) -> Result<Self, ModelError> {
        input.validate()?;
        output.validate()?;
        let features = input.sample_len();
        let classes = output.sample_len();
        if weights.len() != classes || bias.len() != classes {
            return Err(ModelError::Invalid(format!(
                "expected {classes} weight rows and bias values, got {} and {}",
                weights.len(),
                bias.len()
            )));
        }
        if let Some((row, w)) = weights.iter().enumerate().find(|(_, w)| w.len() != features) {
            return Err(ModelError::Invalid(format!(
                "weight row {row} has {} values, expected {features}",
                w.len()
            )));
        }
        Ok(Self {
            input,
            output,
            weights,
            bias,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let text = read_artifact(path)?;
        let artifact: DenseArtifact =
            serde_json::from_str(&text).map_err(|err| ModelError::Parse {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;
        let model = Self::new(
            artifact.input,
            artifact.output,
            artifact.weights,
            artifact.bias,
        )?;
        debug!(
            path = %path.display(),
            classes = model.bias.len(),
            features = model.input.sample_len(),
            "dense model loaded"
        );
        Ok(model)
    }
}

impl SignModel for DenseModel {
    fn input_spec(&self) -> &TensorSpec {
        &self.input
    }

    fn output_spec(&self) -> &TensorSpec {
        &self.output
    }

    fn infer(&self, input: &TensorData) -> Result<Vec<f32>, ModelError> {
        if input.dtype() != self.input.dtype || !self.input.accepts(input.len()) {
            return Err(ModelError::Shape {
                expected: self.input.shape.clone(),
                actual: input.len(),
            });
        }
        let x = input.to_f64();
        let logits: Vec<f64> = self
            .weights
            .iter()
            .zip(&self.bias)
            .map(|(row, b)| {
                row.iter()
                    .zip(&x)
                    .map(|(w, v)| f64::from(*w) * v)
                    .sum::<f64>()
                    + f64::from(*b)
            })
            .collect();
        Ok(softmax(&logits))
    }

    fn describe(&self) -> String {
        format!("dense({}x{})", self.bias.len(), self.input.sample_len())
    }
}

fn softmax(logits: &[f64]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.iter().map(|e| (e / sum) as f32).collect()
}
