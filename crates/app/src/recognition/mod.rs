//! Sign recognition engine: resource lifecycle, per-frame analysis,
//! stabilisation and the MJPEG preview server.
//!
//! The module is split into focused submodules:
//! - `config`: CLI arguments and engine tunables.
//! - `lifecycle`: resource factory, cancellation token, resource bundle.
//! - `engine`: the `RecognitionEngine` context and its acquire/release logic.
//! - `processing`: detect, normalise, classify for one image.
//! - `stabilizer`: majority vote with a hold timer.
//! - `pipeline`: the per-viewer frame iterator.
//! - `single_frame`: stateless prediction for submitted images.
//! - `annotation` and `encoding`: overlay drawing and JPEG output.
//! - `server`: Actix Web endpoints.
//! - `telemetry`: tracing subscriber and Prometheus recorder.

pub use config::{
    ArtifactConfig, CameraMode, DetectorBackend, EngineArgs, EngineConfig, EngineSettings,
    ModelBackend,
};
pub use data::{Prediction, StreamChunk};
pub use engine::RecognitionEngine;
pub use lifecycle::{
    ArtifactFactory, CameraExpectation, CameraStatus, CancellationToken, EngineError,
    ResourceFactory,
};
pub use pipeline::FrameStream;
pub use server::run_server;
pub use single_frame::{DataUrlError, decode_data_url};
pub use stabilizer::{PredictionBuffer, StableLabel, Stabilizer};
pub use telemetry::{TelemetryGuard, TelemetryOptions};

mod annotation;
mod config;
mod data;
mod encoding;
mod engine;
mod lifecycle;
mod pipeline;
mod processing;
mod server;
mod single_frame;
mod stabilizer;
pub mod telemetry;
#[cfg(test)]
mod testing;
