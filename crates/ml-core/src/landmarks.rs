//! Hand landmark sets and the translation/scale normalisation that turns them
//! into classifier features.
//!
//! Indices follow the MediaPipe hand landmark convention: 21 points, wrist at
//! index 0, middle finger MCP at index 9.

use thiserror::Error;

/// MediaPipe hand landmark indices.
#[allow(dead_code)]
pub mod index {
    pub const WRIST: usize = 0;
    pub const THUMB_CMC: usize = 1;
    pub const THUMB_MCP: usize = 2;
    pub const THUMB_IP: usize = 3;
    pub const THUMB_TIP: usize = 4;
    pub const INDEX_FINGER_MCP: usize = 5;
    pub const INDEX_FINGER_PIP: usize = 6;
    pub const INDEX_FINGER_DIP: usize = 7;
    pub const INDEX_FINGER_TIP: usize = 8;
    pub const MIDDLE_FINGER_MCP: usize = 9;
    pub const MIDDLE_FINGER_PIP: usize = 10;
    pub const MIDDLE_FINGER_DIP: usize = 11;
    pub const MIDDLE_FINGER_TIP: usize = 12;
    pub const RING_FINGER_MCP: usize = 13;
    pub const RING_FINGER_PIP: usize = 14;
    pub const RING_FINGER_DIP: usize = 15;
    pub const RING_FINGER_TIP: usize = 16;
    pub const PINKY_MCP: usize = 17;
    pub const PINKY_PIP: usize = 18;
    pub const PINKY_DIP: usize = 19;
    pub const PINKY_TIP: usize = 20;
}

/// Number of points in a complete hand.
pub const LANDMARK_COUNT: usize = 21;
/// Length of a normalised feature vector (x and y per landmark).
pub const FEATURE_LEN: usize = LANDMARK_COUNT * 2;
/// Lower bound for the wrist to middle-MCP distance.
pub const SCALE_EPSILON: f32 = 1e-6;

/// Bone pairs drawn when rendering the hand skeleton.
pub const HAND_CONNECTIONS: [(usize, usize); 21] = [
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 4),
    (0, 5),
    (5, 6),
    (6, 7),
    (7, 8),
    (5, 9),
    (9, 10),
    (10, 11),
    (11, 12),
    (9, 13),
    (13, 14),
    (14, 15),
    (15, 16),
    (13, 17),
    (0, 17),
    (17, 18),
    (18, 19),
    (19, 20),
];

/// Image-relative coordinate in `[0, 1]` (values outside are allowed).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point2 {
    pub x: f32,
    pub y: f32,
}

impl Point2 {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Landmarks of one detected hand, in detector order.
///
/// A set is not guaranteed to be complete; [`normalize`] rejects anything that
/// does not produce exactly [`FEATURE_LEN`] values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LandmarkSet {
    points: Vec<Point2>,
}

impl LandmarkSet {
    pub fn new(points: Vec<Point2>) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[Point2] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl From<Vec<Point2>> for LandmarkSet {
    fn from(points: Vec<Point2>) -> Self {
        Self::new(points)
    }
}

/// Fixed-length classifier input.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureVector(Vec<f32>);

impl FeatureVector {
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("expected {FEATURE_LEN} feature values, got {actual}")]
    Count { actual: usize },
}

/// Translate so the wrist sits at the origin and scale by the wrist to
/// middle-MCP distance, then flatten to `[x0, y0, x1, y1, ..]`.
pub fn normalize(set: &LandmarkSet) -> Result<FeatureVector, NormalizeError> {
    let points = set.points();
    let (Some(wrist), Some(mcp)) = (
        points.get(index::WRIST),
        points.get(index::MIDDLE_FINGER_MCP),
    ) else {
        return Err(NormalizeError::Count {
            actual: points.len() * 2,
        });
    };

    let scale = ((mcp.x - wrist.x).powi(2) + (mcp.y - wrist.y).powi(2))
        .sqrt()
        .max(SCALE_EPSILON);

    let features: Vec<f32> = points
        .iter()
        .flat_map(|p| [(p.x - wrist.x) / scale, (p.y - wrist.y) / scale])
        .collect();

    if features.len() != FEATURE_LEN {
        return Err(NormalizeError::Count {
            actual: features.len(),
        });
    }
    Ok(FeatureVector(features))
}
