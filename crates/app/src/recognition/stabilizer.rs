//! Majority-vote smoothing with a hold timer.
//!
//! Every processed frame pushes its instantaneous label into a fixed-size
//! buffer. Once the buffer is full, a label holding at least the smoothing
//! threshold share of it becomes the stable label. A stable sign survives a
//! fading majority until the hold duration has passed since it was last
//! confirmed.

use std::{
    collections::{HashMap, VecDeque},
    fmt,
    time::{Duration, Instant},
};

use ml_core::FrameLabel;

use crate::recognition::data::Prediction;

/// What the UI shows as the settled result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StableLabel {
    Initializing,
    Ready,
    Sign(String),
    FileMissing,
    InitFailed,
    CameraLost,
    Offline,
}

impl StableLabel {
    pub fn as_str(&self) -> &str {
        match self {
            StableLabel::Initializing => "Initializing...",
            StableLabel::Ready => "Ready...",
            StableLabel::Sign(label) => label,
            StableLabel::FileMissing => "Error: File Missing",
            StableLabel::InitFailed => "Error: Init Failed",
            StableLabel::CameraLost => "Error: Camera Lost",
            StableLabel::Offline => "Offline",
        }
    }

    pub fn is_sign(&self) -> bool {
        matches!(self, StableLabel::Sign(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            StableLabel::FileMissing | StableLabel::InitFailed | StableLabel::CameraLost
        )
    }
}

impl fmt::Display for StableLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bounded FIFO of recent instantaneous labels.
#[derive(Clone, Debug)]
pub struct PredictionBuffer {
    entries: VecDeque<FrameLabel>,
    capacity: usize,
}

impl PredictionBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a label, evicting the oldest when full.
    pub fn push(&mut self, label: FrameLabel) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(label);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() == self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &FrameLabel> {
        self.entries.iter()
    }

    /// Most frequent label and its count. Ties go to the label seen most recently.
    pub fn majority(&self) -> Option<(&FrameLabel, usize)> {
        let mut counts: HashMap<&FrameLabel, (usize, usize)> = HashMap::new();
        for (position, label) in self.entries.iter().enumerate() {
            let entry = counts.entry(label).or_insert((0, position));
            entry.0 += 1;
            entry.1 = position;
        }
        counts
            .into_iter()
            .max_by_key(|(_, (count, last_seen))| (*count, *last_seen))
            .map(|(label, (count, _))| (label, count))
    }
}

/// Stabilisation state for one engine.
#[derive(Clone, Debug)]
pub struct Stabilizer {
    buffer: PredictionBuffer,
    threshold: f32,
    hold: Duration,
    stable: StableLabel,
    last_valid: Option<Instant>,
    last_confidence: f32,
}

impl Stabilizer {
    pub fn new(capacity: usize, threshold: f32, hold: Duration) -> Self {
        Self {
            buffer: PredictionBuffer::new(capacity),
            threshold,
            hold,
            stable: StableLabel::Initializing,
            last_valid: None,
            last_confidence: 0.0,
        }
    }

    pub fn stable(&self) -> &StableLabel {
        &self.stable
    }

    pub fn last_valid(&self) -> Option<Instant> {
        self.last_valid
    }

    pub fn last_confidence(&self) -> f32 {
        self.last_confidence
    }

    pub fn buffer(&self) -> &PredictionBuffer {
        &self.buffer
    }

    /// Stable label with the confidence of the frame that last confirmed it.
    pub fn prediction(&self) -> Prediction {
        let confidence = if self.stable.is_sign() {
            self.last_confidence
        } else {
            0.0
        };
        Prediction::new(self.stable.as_str(), confidence)
    }

    /// Force a sentinel state (error, offline) and drop any pending hold.
    pub fn set(&mut self, label: StableLabel) {
        self.stable = label;
        self.last_valid = None;
    }

    /// Empty the buffer and return to `Ready...`.
    pub fn reset_ready(&mut self) {
        self.buffer.clear();
        self.stable = StableLabel::Ready;
        self.last_valid = None;
        self.last_confidence = 0.0;
    }

    /// Feed one frame's instantaneous result.
    pub fn observe(&mut self, label: FrameLabel, confidence: f32, now: Instant) -> &StableLabel {
        self.buffer.push(label);

        if self.buffer.is_full() {
            let capacity = self.buffer.capacity();
            let strong = self.buffer.majority().and_then(|(candidate, count)| {
                (count as f32 / capacity as f32 >= self.threshold).then(|| candidate.clone())
            });

            match strong {
                Some(FrameLabel::Sign(sign)) => {
                    // Sentinel frames arrive with confidence 0.0, so a weak
                    // frame inside a held sign zeroes the reported value.
                    self.last_confidence = confidence;
                    self.stable = StableLabel::Sign(sign);
                    self.last_valid = Some(now);
                }
                Some(_) => {
                    self.stable = StableLabel::Ready;
                    self.last_valid = None;
                }
                None => {
                    if self.last_valid.is_none() && self.stable != StableLabel::Ready {
                        self.stable = StableLabel::Ready;
                    }
                }
            }
        }

        if let Some(confirmed) = self.last_valid {
            if now.saturating_duration_since(confirmed) >= self.hold {
                self.stable = StableLabel::Ready;
                self.last_valid = None;
            }
        }

        &self.stable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(label: &str) -> FrameLabel {
        FrameLabel::Sign(label.to_string())
    }

    fn stabilizer() -> Stabilizer {
        let mut s = Stabilizer::new(10, 0.9, Duration::from_millis(1500));
        s.reset_ready();
        s
    }

    fn feed(s: &mut Stabilizer, label: FrameLabel, times: usize, now: Instant) {
        for _ in 0..times {
            s.observe(label.clone(), 0.95, now);
        }
    }

    #[test]
    fn buffer_evicts_oldest_beyond_capacity() {
        let mut buffer = PredictionBuffer::new(10);
        for i in 0..11 {
            buffer.push(sign(&i.to_string()));
            assert!(buffer.len() <= 10);
        }
        assert_eq!(buffer.len(), 10);
        assert_eq!(buffer.iter().next(), Some(&sign("1")));
    }

    #[test]
    fn majority_ties_go_to_most_recent_label() {
        let mut buffer = PredictionBuffer::new(4);
        buffer.push(sign("A"));
        buffer.push(sign("B"));
        buffer.push(sign("B"));
        buffer.push(sign("A"));
        assert_eq!(buffer.majority(), Some((&sign("A"), 2)));
    }

    #[test]
    fn starts_initializing_until_reset() {
        let s = Stabilizer::new(10, 0.9, Duration::from_secs(1));
        assert_eq!(s.stable(), &StableLabel::Initializing);
        assert_eq!(s.prediction(), Prediction::new("Initializing...", 0.0));
    }

    #[test]
    fn ten_matching_frames_make_a_stable_sign() {
        let mut s = stabilizer();
        let now = Instant::now();
        feed(&mut s, sign("A"), 9, now);
        assert_eq!(s.stable(), &StableLabel::Ready);
        s.observe(sign("A"), 0.97, now);
        assert_eq!(s.stable(), &StableLabel::Sign("A".into()));
        assert_eq!(s.last_valid(), Some(now));
        assert_eq!(s.prediction(), Prediction::new("A", 0.97));
    }

    #[test]
    fn sentinel_majority_holds_sign_until_hold_elapses() {
        let mut s = stabilizer();
        let start = Instant::now();
        feed(&mut s, sign("A"), 10, start);

        // No hand everywhere is a sentinel majority, which drops straight to Ready.
        let mut s2 = s.clone();
        feed(&mut s2, FrameLabel::NoHand, 10, start + Duration::from_millis(100));
        assert_eq!(s2.stable(), &StableLabel::Ready);

        // A weak mix keeps the sign until the hold duration has passed. The
        // first no-hand frame still leaves a 9/10 majority, which refreshes the
        // hold timestamp at +200ms.
        feed(&mut s, FrameLabel::NoHand, 5, start + Duration::from_millis(200));
        assert_eq!(s.stable(), &StableLabel::Sign("A".into()));
        s.observe(FrameLabel::NoHand, 0.0, start + Duration::from_millis(1600));
        assert_eq!(s.stable(), &StableLabel::Sign("A".into()));
        s.observe(FrameLabel::NoHand, 0.0, start + Duration::from_millis(1700));
        assert_eq!(s.stable(), &StableLabel::Ready);
        assert_eq!(s.last_valid(), None);
        assert_eq!(s.prediction().confidence, 0.0);
    }

    #[test]
    fn low_confidence_frame_zeroes_held_sign_confidence() {
        let mut s = stabilizer();
        let now = Instant::now();
        feed(&mut s, sign("A"), 10, now);
        assert_eq!(s.prediction(), Prediction::new("A", 0.95));

        s.observe(FrameLabel::LowConfidence, 0.0, now + Duration::from_millis(40));
        assert_eq!(s.stable(), &StableLabel::Sign("A".into()));
        assert_eq!(s.last_confidence(), 0.0);
        assert_eq!(s.prediction(), Prediction::new("A", 0.0));

        s.observe(sign("A"), 0.91, now + Duration::from_millis(80));
        assert_eq!(s.prediction(), Prediction::new("A", 0.91));
    }

    #[test]
    fn split_buffer_keeps_label_until_hold() {
        let mut s = stabilizer();
        let start = Instant::now();
        feed(&mut s, sign("A"), 10, start);
        for _ in 0..5 {
            s.observe(sign("B"), 0.9, start + Duration::from_millis(500));
        }
        assert_eq!(s.stable(), &StableLabel::Sign("A".into()));
        s.observe(sign("A"), 0.9, start + Duration::from_millis(1000));
        assert_eq!(s.stable(), &StableLabel::Sign("A".into()));
        s.observe(sign("B"), 0.9, start + Duration::from_millis(1500));
        assert_eq!(s.stable(), &StableLabel::Sign("A".into()));
        s.observe(sign("B"), 0.9, start + Duration::from_millis(2000));
        assert_eq!(s.stable(), &StableLabel::Ready);
    }

    #[test]
    fn weak_majority_without_pending_sign_returns_to_ready() {
        let mut s = stabilizer();
        s.set(StableLabel::CameraLost);
        let now = Instant::now();
        feed(&mut s, sign("A"), 5, now);
        feed(&mut s, sign("B"), 5, now);
        assert_eq!(s.stable(), &StableLabel::Ready);
    }

    #[test]
    fn new_sign_majority_replaces_previous_sign() {
        let mut s = stabilizer();
        let now = Instant::now();
        feed(&mut s, sign("A"), 10, now);
        feed(&mut s, sign("B"), 9, now);
        assert_eq!(s.stable(), &StableLabel::Sign("B".into()));
    }

    #[test]
    fn hold_expires_before_buffer_fills() {
        let mut s = stabilizer();
        let start = Instant::now();
        feed(&mut s, sign("A"), 10, start);
        s.reset_ready();
        assert_eq!(s.stable(), &StableLabel::Ready);

        let mut s = stabilizer();
        feed(&mut s, sign("A"), 10, start);
        let mut held = s.clone();
        held.buffer.clear();
        held.observe(sign("A"), 0.9, start + Duration::from_secs(2));
        assert_eq!(held.stable(), &StableLabel::Ready);
    }

    #[test]
    fn errors_are_distinguished_from_idle_labels() {
        assert!(StableLabel::CameraLost.is_error());
        assert!(!StableLabel::Ready.is_error());
        assert!(!StableLabel::Offline.is_error());
        assert_eq!(StableLabel::FileMissing.to_string(), "Error: File Missing");
    }
}
