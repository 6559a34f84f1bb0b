//! Fixed-size sample window with a trimmed-mean estimator.
//!
//! The window starts empty: a read before any sample yields the configured
//! default.  Non-finite samples are kept in their slot but never counted.

use heapless::Vec;

/// Number of samples retained per aggregate.
pub const WINDOW_CAP: usize = 10;

/// Below this many valid samples the plain mean is used (no cropping).
const MIN_SAMPLES_FOR_TRIM: usize = 3;
/// Above this many valid samples two values are cropped from each end.
const WIDE_TRIM_THRESHOLD: usize = 6;

#[derive(Debug, Clone)]
pub struct TrimmedWindow {
    slots: [Option<f32>; WINDOW_CAP],
    cursor: usize,
    default: f32,
    cached: Option<f32>,
}

impl TrimmedWindow {
    pub fn new(default: f32) -> Self {
        Self {
            slots: [None; WINDOW_CAP],
            cursor: 0,
            default,
            cached: None,
        }
    }

    /// Record a sample, overwriting the oldest once the window is full.
    pub fn push(&mut self, value: f32) {
        self.slots[self.cursor] = Some(value);
        self.cursor = (self.cursor + 1) % WINDOW_CAP;
        self.cached = None;
    }

    /// Current estimate.  Recomputed only after a push.
    pub fn value(&mut self) -> f32 {
        if let Some(v) = self.cached {
            return v;
        }
        let v = self.compute();
        self.cached = Some(v);
        v
    }

    /// True if the next [`value`](Self::value) call has to recompute.
    pub fn is_stale(&self) -> bool {
        self.cached.is_none()
    }

    /// Number of valid samples currently held.
    pub fn valid_count(&self) -> usize {
        self.slots.iter().flatten().filter(|v| v.is_finite()).count()
    }

    fn compute(&self) -> f32 {
        let mut samples: Vec<f32, WINDOW_CAP> = self
            .slots
            .iter()
            .flatten()
            .copied()
            .filter(|v| v.is_finite())
            .collect();

        if samples.is_empty() {
            return self.default;
        }
        if samples.len() < MIN_SAMPLES_FOR_TRIM {
            return mean(&samples);
        }

        samples.sort_unstable_by(f32::total_cmp);
        let crop = if samples.len() > WIDE_TRIM_THRESHOLD { 2 } else { 1 };
        mean(&samples[crop..samples.len() - crop])
    }
}

fn mean(values: &[f32]) -> f32 {
    values.iter().sum::<f32>() / values.len() as f32
}
