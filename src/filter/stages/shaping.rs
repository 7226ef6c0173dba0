//! Linear shaping and limiting.

use crate::sample::Block;

/// `y = x * gain + offset` per channel. Scale and offset filters both build into this.
#[derive(Clone, Debug)]
pub(crate) struct Affine {
    gain: Vec<f64>,
    offset: Vec<f64>,
}

impl Affine {
    pub fn scale(factors: &[Option<f64>]) -> Self {
        Self {
            gain: factors.iter().map(|f| f.unwrap_or(1.0)).collect(),
            offset: vec![0.0; factors.len()],
        }
    }

    pub fn offset(values: &[Option<f64>]) -> Self {
        Self {
            gain: vec![1.0; values.len()],
            offset: values.iter().map(|v| v.unwrap_or(0.0)).collect(),
        }
    }

    pub fn process(&mut self, block: &mut Block) {
        for frame in block.iter_frames_mut() {
            for ((s, g), o) in frame.iter_mut().zip(&self.gain).zip(&self.offset) {
                *s = *s * g + o;
            }
        }
    }
}

/// Hard clamp to `[min, max]`.
#[derive(Clone, Debug)]
pub(crate) struct Limit {
    bounds: Vec<Option<(f64, f64)>>,
}

impl Limit {
    pub fn new(bounds: &[Option<(f64, f64)>]) -> Self {
        Self { bounds: bounds.to_vec() }
    }

    pub fn process(&mut self, block: &mut Block) {
        for frame in block.iter_frames_mut() {
            for (s, b) in frame.iter_mut().zip(&self.bounds) {
                if let Some((min, max)) = b {
                    *s = s.clamp(*min, *max);
                }
            }
        }
    }
}

/// Slew-rate limiter: consecutive outputs never differ by more than `max_rate`.
///
/// The first output is measured against zero, the neutral position.
#[derive(Clone, Debug)]
pub(crate) struct RateLimit {
    max_rate: Vec<Option<f64>>,
    last: Vec<f64>,
}

impl RateLimit {
    pub fn new(max_rate: &[Option<f64>]) -> Self {
        Self {
            max_rate: max_rate.to_vec(),
            last: vec![0.0; max_rate.len()],
        }
    }

    pub fn process(&mut self, block: &mut Block) {
        for frame in block.iter_frames_mut() {
            for ((s, rate), last) in frame.iter_mut().zip(&self.max_rate).zip(self.last.iter_mut()) {
                if let Some(rate) = rate {
                    let delta = (*s - *last).clamp(-rate, *rate);
                    *s = *last + delta;
                }
                *last = *s;
            }
        }
    }

    pub fn reset(&mut self) {
        self.last.iter_mut().for_each(|l| *l = 0.0);
    }
}
