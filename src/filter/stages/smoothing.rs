//! Noise reduction and moving average.

use crate::filter::params::MEAN_MAX;
use crate::sample::Block;

/// Scalar Kalman smoother with unit process noise.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Kalman {
    r: f64,
    x: f64,
    p: f64,
    primed: bool,
}

impl Kalman {
    pub fn new(covariance: f64) -> Self {
        Self {
            r: covariance,
            x: 0.0,
            p: 0.0,
            primed: false,
        }
    }

    #[inline]
    pub fn update(&mut self, z: f64) -> f64 {
        if !self.primed {
            self.x = z;
            self.p = self.r;
            self.primed = true;
            return z;
        }
        self.p += 1.0;
        let gain = self.p / (self.p + self.r);
        self.x += gain * (z - self.x);
        self.p *= 1.0 - gain;
        self.x
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.r);
    }
}

/// Per-channel Kalman smoothing. Channels without a filter pass through.
#[derive(Clone, Debug)]
pub(crate) struct Noise {
    channels: Vec<Option<Kalman>>,
}

impl Noise {
    pub fn new(covariance: &[Option<f64>]) -> Self {
        Self {
            channels: covariance
                .iter()
                .map(|c| c.filter(|c| *c > 0.0).map(Kalman::new))
                .collect(),
        }
    }

    pub fn process(&mut self, block: &mut Block) {
        for frame in block.iter_frames_mut() {
            for (s, k) in frame.iter_mut().zip(self.channels.iter_mut()) {
                if let Some(k) = k {
                    *s = k.update(*s);
                }
            }
        }
    }

    pub fn reset(&mut self) {
        self.channels.iter_mut().flatten().for_each(Kalman::reset);
    }
}

#[derive(Clone, Copy, Debug)]
struct Window {
    ring: [f64; MEAN_MAX],
    len: usize,
    filled: usize,
    next: usize,
}

impl Window {
    fn new(len: usize) -> Self {
        Self {
            ring: [0.0; MEAN_MAX],
            len: len.min(MEAN_MAX),
            filled: 0,
            next: 0,
        }
    }

    #[inline]
    fn push(&mut self, x: f64) -> f64 {
        self.ring[self.next] = x;
        self.next = (self.next + 1) % self.len;
        self.filled = (self.filled + 1).min(self.len);
        self.ring[..self.filled].iter().sum::<f64>() / self.filled as f64
    }
}

/// Moving average over the last `count` samples of each channel.
#[derive(Clone, Debug)]
pub(crate) struct Mean {
    channels: Vec<Option<Window>>,
}

impl Mean {
    pub fn new(counts: &[Option<usize>]) -> Self {
        Self {
            channels: counts
                .iter()
                .map(|c| c.filter(|c| *c > 1).map(Window::new))
                .collect(),
        }
    }

    pub fn process(&mut self, block: &mut Block) {
        for frame in block.iter_frames_mut() {
            for (s, w) in frame.iter_mut().zip(self.channels.iter_mut()) {
                if let Some(w) = w {
                    *s = w.push(*s);
                }
            }
        }
    }

    pub fn reset(&mut self) {
        for w in self.channels.iter_mut().flatten() {
            *w = Window::new(w.len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn variance(xs: &[f64]) -> f64 {
        let mean = xs.iter().sum::<f64>() / xs.len() as f64;
        xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / xs.len() as f64
    }

    #[test]
    fn kalman_reduces_sample_variance() {
        let input: Vec<f64> = (0..200).map(|i| if i % 2 == 0 { 100.0 } else { -100.0 }).collect();
        let mut block = Block::from_interleaved(1, input.clone());
        Noise::new(&[Some(50.0)]).process(&mut block);
        assert!(variance(&block.as_slice()[50..]) < variance(&input[50..]) * 0.1);
    }

    #[test]
    fn more_covariance_smooths_harder() {
        let input: Vec<f64> = (0..100).map(|i| ((i * 37) % 11) as f64 * 10.0).collect();
        let run = |c: f64| {
            let mut block = Block::from_interleaved(1, input.clone());
            Noise::new(&[Some(c)]).process(&mut block);
            variance(&block.as_slice()[20..])
        };
        assert!(run(80.0) < run(2.0));
    }

    #[test]
    fn zero_covariance_passes_through() {
        let mut block = Block::from_interleaved(2, vec![1.0, 2.0, 3.0, 4.0]);
        Noise::new(&[Some(0.0), None]).process(&mut block);
        assert_eq!(block.as_slice(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn mean_averages_the_last_n_samples() {
        let mut block = Block::from_interleaved(1, vec![4.0, 8.0, 12.0, 16.0, 20.0]);
        Mean::new(&[Some(2)]).process(&mut block);
        let out = block.as_slice();
        assert_relative_eq!(out[0], 4.0);
        assert_relative_eq!(out[1], 6.0);
        assert_relative_eq!(out[4], 18.0);
    }

    #[test]
    fn mean_state_carries_across_blocks() {
        let mut mean = Mean::new(&[Some(4)]);
        let mut a = Block::from_interleaved(1, vec![4.0, 4.0]);
        let mut b = Block::from_interleaved(1, vec![8.0, 8.0]);
        mean.process(&mut a);
        mean.process(&mut b);
        assert_relative_eq!(b.as_slice()[1], 6.0);
    }
}
