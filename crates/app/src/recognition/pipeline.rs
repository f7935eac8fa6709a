//! Per-viewer frame loop: capture, mirror, detect, classify, stabilise,
//! annotate, encode.
//!
//! [`FrameStream`] is a lazy iterator. Nothing happens until the first pull,
//! and each pull blocks until the next chunk is ready, so it belongs on a
//! dedicated thread. It is single-consumer; start one stream per viewer.
//! The stream ends when the engine's cancellation token fires (a release)
//! or when the consumer drops it.

use std::time::Duration;

use image::{Rgb, RgbImage, imageops};
use ml_core::FrameLabel;
use tracing::{debug, error, info_span, warn};
use video_ingest::Frame;

use crate::recognition::{
    annotation::{self, ERROR_COLOR, IDLE_COLOR},
    config::CameraMode,
    data::StreamChunk,
    encoding::encode_jpeg,
    engine::RecognitionEngine,
    lifecycle::{CameraExpectation, CameraStatus, CancellationToken, EngineError},
    processing::{FrameAnalysis, analyze},
    stabilizer::StableLabel,
};

const BYPASS_MESSAGE: &str = "Camera Disabled by Server Config";
const CAMERA_LOST_MESSAGE: &str = "Camera Connection Lost";
const INIT_FAILED_MESSAGE: &str = "Camera/Model Init Failed";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StreamMode {
    Pending,
    Bypass,
    Live,
    InitFailed,
    Finished,
}

/// Lazy, unbounded sequence of annotated JPEG frames.
pub struct FrameStream {
    engine: RecognitionEngine,
    mode: StreamMode,
    token: CancellationToken,
    backoff: Option<Duration>,
    frame_number: u64,
    touched_camera: bool,
    counted: bool,
}

impl FrameStream {
    pub(crate) fn new(engine: RecognitionEngine) -> Self {
        Self {
            engine,
            mode: StreamMode::Pending,
            token: CancellationToken::new(),
            backoff: None,
            frame_number: 0,
            touched_camera: false,
            counted: false,
        }
    }

    pub fn frames_emitted(&self) -> u64 {
        self.frame_number
    }

    fn start(&mut self) {
        if self.engine.settings().camera == CameraMode::Disabled {
            debug!("camera disabled; serving placeholder stream");
            self.token = self.engine.stream_token();
            self.mode = StreamMode::Bypass;
        } else {
            match self.engine.acquire(CameraExpectation::Required) {
                Ok(status) => {
                    debug!(?status, "stream started");
                    self.token = self.engine.cancellation_token();
                    self.mode = StreamMode::Live;
                }
                Err(err) => {
                    warn!("stream cannot start: {err}");
                    self.mode = StreamMode::InitFailed;
                    return;
                }
            }
        }
        metrics::gauge!("signsight_active_streams").increment(1.0);
        self.counted = true;
    }

    fn finish(&mut self) -> Option<StreamChunk> {
        if self.mode != StreamMode::Finished {
            debug!(frames = self.frame_number, "stream finished");
        }
        self.mode = StreamMode::Finished;
        None
    }

    fn next_bypass(&mut self) -> Option<StreamChunk> {
        if self.frame_number > 0 && !self.token.sleep(self.engine.settings().placeholder_interval) {
            return self.finish();
        }
        if self.token.is_cancelled() {
            return self.finish();
        }
        self.placeholder(BYPASS_MESSAGE, IDLE_COLOR)
    }

    fn next_live(&mut self) -> Option<StreamChunk> {
        let settings = self.engine.settings().clone();
        loop {
            if let Some(delay) = self.backoff.take() {
                if !self.token.sleep(delay) {
                    return self.finish();
                }
            }
            if self.token.is_cancelled() {
                return self.finish();
            }

            let camera = match self.engine.camera_handle() {
                Some(camera) => camera,
                None => {
                    match self
                        .engine
                        .acquire_inner(CameraExpectation::Required, Some(&self.token))
                    {
                        Ok(CameraStatus::Open) => continue,
                        Err(EngineError::Cancelled) => return self.finish(),
                        Ok(status) => debug!(?status, "camera still unavailable"),
                        Err(err) => warn!("re-acquire failed: {err}"),
                    }
                    metrics::counter!("signsight_camera_lost_total").increment(1);
                    self.engine.set_stable(StableLabel::CameraLost);
                    self.backoff = Some(settings.camera_retry_delay);
                    return self.placeholder(CAMERA_LOST_MESSAGE, ERROR_COLOR);
                }
            };

            self.touched_camera = true;
            let read = camera
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .read();
            if self.token.is_cancelled() {
                return self.finish();
            }

            let frame = match read {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    self.backoff = Some(settings.empty_read_backoff);
                    continue;
                }
                Err(err) => {
                    warn!("camera read failed: {err}");
                    self.engine.release_camera_device();
                    continue;
                }
            };

            if let Some(chunk) = self.process(frame) {
                return Some(chunk);
            }
        }
    }

    fn process(&mut self, frame: Frame) -> Option<StreamChunk> {
        let span = info_span!("stream.frame", frame = self.frame_number + 1);
        let _entered = span.enter();
        let settings = self.engine.settings();

        let Some(mut image) =
            RgbImage::from_raw(frame.width as u32, frame.height as u32, frame.to_rgb_bytes())
        else {
            warn!(
                width = frame.width,
                height = frame.height,
                len = frame.data.len(),
                "frame buffer does not match its dimensions"
            );
            return None;
        };
        if settings.mirror {
            imageops::flip_horizontal_in_place(&mut image);
        }

        let analysis = match self.engine.inference_handles() {
            Some(handles) => analyze(&image, &handles, settings.stream_min_confidence),
            None => FrameAnalysis {
                classification: ml_core::Classification::sentinel(
                    FrameLabel::InitializationError,
                ),
                landmarks: None,
            },
        };
        let label = analysis.classification.label.clone();
        metrics::counter!("signsight_frames_total", "label" => label.kind()).increment(1);

        let (stable, prediction) = self
            .engine
            .observe_frame(label.clone(), analysis.classification.confidence);

        if let Some(hand) = analysis.landmarks.as_ref() {
            annotation::draw_hand(&mut image, hand);
        }
        annotation::draw_overlay(
            &mut image,
            &label,
            analysis.classification.score,
            &stable,
        );

        let jpeg = match encode_jpeg(&image, settings.jpeg_quality) {
            Ok(jpeg) => jpeg,
            Err(err) => {
                error!("frame encoding failed: {err}");
                return None;
            }
        };

        self.frame_number += 1;
        Some(StreamChunk {
            jpeg,
            frame_number: self.frame_number,
            timestamp_ms: frame.timestamp_ms,
            instantaneous: Some(label),
            stable: prediction,
        })
    }

    fn placeholder(&mut self, message: &str, color: Rgb<u8>) -> Option<StreamChunk> {
        let (width, height) = self.engine.settings().capture_size;
        let image = annotation::placeholder_frame((width as u32, height as u32), message, color);
        match encode_jpeg(&image, self.engine.settings().jpeg_quality) {
            Ok(jpeg) => {
                self.frame_number += 1;
                Some(StreamChunk {
                    jpeg,
                    frame_number: self.frame_number,
                    timestamp_ms: chrono::Utc::now().timestamp_millis(),
                    instantaneous: None,
                    stable: self.engine.stable_prediction(),
                })
            }
            Err(err) => {
                error!("placeholder encoding failed: {err}");
                self.finish()
            }
        }
    }
}

impl Iterator for FrameStream {
    type Item = StreamChunk;

    fn next(&mut self) -> Option<StreamChunk> {
        loop {
            match self.mode {
                StreamMode::Pending => self.start(),
                StreamMode::Bypass => return self.next_bypass(),
                StreamMode::Live => return self.next_live(),
                StreamMode::InitFailed => {
                    let chunk = self.placeholder(INIT_FAILED_MESSAGE, ERROR_COLOR);
                    self.mode = StreamMode::Finished;
                    return chunk;
                }
                StreamMode::Finished => return None,
            }
        }
    }
}

impl Drop for FrameStream {
    fn drop(&mut self) {
        if self.counted {
            metrics::gauge!("signsight_active_streams").decrement(1.0);
        }
        // After a release the camera is already closed, and a later session may
        // own a new one.
        if self.touched_camera && !self.token.is_cancelled() {
            self.engine.release_camera_device();
        }
    }
}
