//! Hand pose detection.
//!
//! The default detector drives a MediaPipe helper process over stdin/stdout.
//! Each request is a little-endian `u32` header (width, height, channels)
//! followed by the raw RGB bytes; each reply is one JSON line:
//!
//! ```json
//! {"hands": [{"handedness": "Right", "score": 0.97, "landmarks": [{"x": 0.4, "y": 0.6, "z": 0.0}, ...]}]}
//! ```
//!
//! The helper prints `READY` once its model is loaded. If the pipe breaks the
//! failed request returns an error and the next request relaunches the helper.

use std::{
    ffi::OsString,
    io::{BufRead, BufReader, Write},
    path::PathBuf,
    process::{Child, ChildStdin, ChildStdout, Command, Stdio},
    sync::Mutex,
};

use image::RgbImage;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{
    landmarks::{LandmarkSet, Point2},
    model::ModelError,
};

/// Finds at most one hand (the first reported) in an RGB image.
pub trait HandDetector: Send + Sync {
    fn detect(&self, image: &RgbImage) -> Result<Option<LandmarkSet>, ModelError>;

    fn describe(&self) -> String {
        "hand-detector".to_string()
    }
}

#[derive(Deserialize, Debug)]
struct LandmarkJson {
    x: f32,
    y: f32,
    #[allow(dead_code)]
    #[serde(default)]
    z: f32,
}

#[derive(Deserialize, Debug)]
struct HandJson {
    #[serde(default)]
    handedness: String,
    score: f32,
    landmarks: Vec<LandmarkJson>,
}

#[derive(Deserialize, Debug)]
struct DetectionReply {
    #[serde(default)]
    hands: Vec<HandJson>,
    #[serde(default)]
    error: Option<String>,
}

/// How to launch the helper process.
#[derive(Clone, Debug)]
pub struct SidecarConfig {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    /// Hands scored below this are ignored.
    pub min_hand_score: f32,
}

impl SidecarConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            min_hand_score: 0.5,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }
}

struct SidecarIo {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl SidecarIo {
    /// Spawn the helper and wait for its `READY` line.
    fn launch(config: &SidecarConfig) -> Result<Self, ModelError> {
        info!(program = %config.program.display(), "starting hand detector sidecar");
        let mut child = Command::new(&config.program)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|err| {
                ModelError::Detector(format!(
                    "failed to start {}: {err}",
                    config.program.display()
                ))
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            return Err(ModelError::Detector("sidecar pipes unavailable".into()));
        };
        let mut stdout = BufReader::new(stdout);

        let mut ready = String::new();
        let handshake = stdout.read_line(&mut ready);
        if !matches!(handshake, Ok(n) if n > 0) || ready.trim() != "READY" {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ModelError::Detector(format!(
                "sidecar did not signal ready, got {:?}",
                ready.trim()
            )));
        }
        debug!("hand detector sidecar ready");

        Ok(Self {
            child,
            stdin,
            stdout,
        })
    }

    /// Send one frame and read back its reply line.
    fn exchange(&mut self, image: &RgbImage) -> std::io::Result<String> {
        self.stdin.write_all(&image.width().to_le_bytes())?;
        self.stdin.write_all(&image.height().to_le_bytes())?;
        self.stdin.write_all(&3u32.to_le_bytes())?;
        self.stdin.write_all(image.as_raw())?;
        self.stdin.flush()?;

        let mut line = String::new();
        if self.stdout.read_line(&mut line)? == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "sidecar closed its output",
            ));
        }
        Ok(line)
    }

    fn shutdown(mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// MediaPipe hand landmarker running in a helper process.
pub struct SidecarHandDetector {
    io: Mutex<Option<SidecarIo>>,
    config: SidecarConfig,
}

impl SidecarHandDetector {
    /// Spawn the helper and wait for its `READY` line.
    pub fn spawn(config: &SidecarConfig) -> Result<Self, ModelError> {
        let io = SidecarIo::launch(config)?;
        Ok(Self {
            io: Mutex::new(Some(io)),
            config: config.clone(),
        })
    }

    /// Whether a helper process is currently attached and still running.
    pub fn is_alive(&self) -> bool {
        let mut io = self.io.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        io.as_mut()
            .is_some_and(|io| matches!(io.child.try_wait(), Ok(None)))
    }
}

impl HandDetector for SidecarHandDetector {
    fn detect(&self, image: &RgbImage) -> Result<Option<LandmarkSet>, ModelError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(None);
        }
        let mut slot = self.io.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_none() {
            warn!(program = %self.config.program.display(), "relaunching hand detector sidecar");
            *slot = Some(SidecarIo::launch(&self.config)?);
        }
        let Some(io) = slot.as_mut() else {
            return Err(ModelError::Detector("sidecar unavailable".into()));
        };

        match io.exchange(image) {
            Ok(line) => parse_reply(&line, self.config.min_hand_score),
            Err(err) => {
                if let Some(dead) = slot.take() {
                    dead.shutdown();
                }
                Err(ModelError::Detector(format!("sidecar I/O: {err}")))
            }
        }
    }

    fn describe(&self) -> String {
        format!("mediapipe-sidecar:{}", self.config.program.display())
    }
}

impl Drop for SidecarHandDetector {
    fn drop(&mut self) {
        let slot = self.io.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(io) = slot.take() {
            io.shutdown();
        }
    }
}

/// Decode one reply line and keep the first hand scoring at least `min_score`.
fn parse_reply(line: &str, min_score: f32) -> Result<Option<LandmarkSet>, ModelError> {
    let reply: DetectionReply = serde_json::from_str(line.trim())
        .map_err(|err| ModelError::Detector(format!("malformed sidecar reply: {err}")))?;
    if let Some(error) = reply.error {
        warn!("sidecar reported an error: {error}");
        return Err(ModelError::Detector(error));
    }
    let Some(hand) = reply.hands.into_iter().find(|hand| hand.score >= min_score) else {
        return Ok(None);
    };
    debug!(
        handedness = %hand.handedness,
        score = hand.score,
        points = hand.landmarks.len(),
        "hand detected"
    );
    let points = hand
        .landmarks
        .into_iter()
        .map(|lm| Point2::new(lm.x, lm.y))
        .collect();
    Ok(Some(LandmarkSet::new(points)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hand_json(score: f32, points: usize) -> String {
        let landmarks: Vec<String> = (0..points)
            .map(|i| format!(r#"{{"x":{},"y":0.5,"z":0.0}}"#, i as f32 * 0.01))
            .collect();
        format!(
            r#"{{"handedness":"Right","score":{score},"landmarks":[{}]}}"#,
            landmarks.join(",")
        )
    }

    #[test]
    fn first_confident_hand_is_returned() {
        let line = format!(r#"{{"hands":[{},{}]}}"#, hand_json(0.2, 21), hand_json(0.9, 21));
        let set = parse_reply(&line, 0.5).unwrap().unwrap();
        assert_eq!(set.len(), 21);
        assert!((set.points()[3].x - 0.03).abs() < 1e-6);
    }

    #[test]
    fn empty_reply_means_no_hand() {
        assert_eq!(parse_reply(r#"{"hands":[]}"#, 0.5).unwrap(), None);
        let line = format!(r#"{{"hands":[{}]}}"#, hand_json(0.3, 21));
        assert_eq!(parse_reply(&line, 0.5).unwrap(), None);
    }

    #[test]
    fn incomplete_hands_are_passed_through() {
        let line = format!(r#"{{"hands":[{}]}}"#, hand_json(0.9, 20));
        assert_eq!(parse_reply(&line, 0.5).unwrap().unwrap().len(), 20);
    }

    #[test]
    fn sidecar_errors_and_garbage_fail() {
        assert!(parse_reply(r#"{"hands":[],"error":"model missing"}"#, 0.5).is_err());
        assert!(parse_reply("not json", 0.5).is_err());
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let config = SidecarConfig::new("/nonexistent/hand-detector-sidecar");
        assert!(matches!(
            SidecarHandDetector::spawn(&config),
            Err(ModelError::Detector(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn handshake_requires_ready_line() {
        let config = SidecarConfig::new("sh").arg("-c").arg("echo LOADING");
        assert!(SidecarHandDetector::spawn(&config).is_err());
    }

    /// The first helper exits right after its handshake; later ones answer
    /// one request with an empty reply.
    #[cfg(unix)]
    #[test]
    fn dead_helper_is_relaunched_on_next_request() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("launched");
        let script = r#"if [ -e "$1" ]; then echo READY; head -c 24 >/dev/null; echo '{"hands":[]}'; else touch "$1"; echo READY; fi"#;
        let config = SidecarConfig::new("sh")
            .arg("-c")
            .arg(script)
            .arg("sh")
            .arg(marker.as_os_str());
        let detector = SidecarHandDetector::spawn(&config).unwrap();
        let image = RgbImage::new(2, 2);

        assert!(matches!(detector.detect(&image), Err(ModelError::Detector(_))));
        assert!(!detector.is_alive());
        assert_eq!(detector.detect(&image).unwrap(), None);
    }
}
