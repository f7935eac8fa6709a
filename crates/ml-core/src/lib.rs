//! Hand landmark features and the sign classifier backends.
//!
//! The flow for one image is `HandDetector::detect` -> [`normalize`] ->
//! [`classify`]. Each step is usable on its own and every backend sits behind
//! a trait so the engine can swap them or substitute fakes.

pub mod classifier;
pub mod detector;
pub mod labels;
pub mod landmarks;
pub mod model;
#[cfg(feature = "with-tch")]
pub mod torch;
pub mod verdict;

pub use classifier::{Classification, classify};
pub use detector::{HandDetector, SidecarConfig, SidecarHandDetector};
pub use labels::load_labels;
pub use landmarks::{FEATURE_LEN, FeatureVector, LandmarkSet, NormalizeError, Point2, normalize};
pub use model::{DType, DenseModel, ModelError, SignModel, TensorData, TensorSpec};
pub use verdict::FrameLabel;

#[cfg(feature = "with-tch")]
pub use tch;
