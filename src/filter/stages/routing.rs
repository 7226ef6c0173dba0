//! Channel routing and encoding conversion.

use crate::filter::params::CombineMode;
use crate::format::{Encoding, CHANNELS_MAX};
use crate::sample::{convert, Block};

/// Each output channel merges two source axes of the same frame.
#[derive(Clone, Debug)]
pub(crate) struct Combine {
    ops: Vec<Option<(CombineMode, usize, usize)>>,
}

impl Combine {
    pub fn new(ops: &[Option<(CombineMode, usize, usize)>]) -> Self {
        Self { ops: ops.to_vec() }
    }

    pub fn process(&mut self, block: &mut Block) {
        let mut input = [0.0; CHANNELS_MAX];
        for frame in block.iter_frames_mut() {
            let n = frame.len().min(CHANNELS_MAX);
            input[..n].copy_from_slice(&frame[..n]);
            for (s, op) in frame.iter_mut().zip(&self.ops) {
                if let Some((mode, a, b)) = op {
                    *s = mode.apply(input[*a], input[*b]);
                }
            }
        }
    }
}

/// Output channel `i` takes one-based source axis `map[i]`; 0 yields zero.
#[derive(Clone, Debug)]
pub(crate) struct ChannelMap {
    map: Vec<usize>,
    scratch: Block,
}

impl ChannelMap {
    pub fn new(map: Vec<usize>) -> Self {
        let channels = map.len();
        Self {
            map,
            scratch: Block::new(channels),
        }
    }

    /// Keep the first `to` channels of `from`, padding with zero.
    pub fn fit(from: usize, to: usize) -> Self {
        Self::new((1..=to).map(|i| if i <= from { i } else { 0 }).collect())
    }

    pub fn channels(&self) -> usize {
        self.map.len()
    }

    pub fn process(&mut self, block: &mut Block) {
        self.scratch.reset(self.map.len());
        let mut out = [0.0; CHANNELS_MAX];
        for frame in block.iter_frames() {
            for (o, axis) in out.iter_mut().zip(&self.map) {
                *o = match axis {
                    0 => 0.0,
                    a => frame.get(a - 1).copied().unwrap_or(0.0),
                };
            }
            self.scratch.push_frame(&out[..self.map.len()]);
        }
        core::mem::swap(block, &mut self.scratch);
    }
}

/// Re-express every sample in another encoding's native units.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Convert {
    from: Encoding,
    to: Encoding,
}

impl Convert {
    pub fn new(from: Encoding, to: Encoding) -> Self {
        Self { from, to }
    }

    pub fn process(&mut self, block: &mut Block) {
        if self.from == self.to {
            return;
        }
        for s in block.as_mut_slice() {
            *s = convert(*s, self.from, self.to);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn combine_reads_the_unmodified_frame() {
        let mut block = Block::from_interleaved(3, vec![1.0, 2.0, 3.0]);
        Combine::new(&[
            Some((CombineMode::Add, 1, 2)),
            Some((CombineMode::Subtract, 0, 2)),
            Some((CombineMode::Max, 0, 1)),
        ])
        .process(&mut block);
        assert_eq!(block.as_slice(), &[5.0, -2.0, 2.0]);
    }

    #[test]
    fn channel_map_reorders_and_zeroes() {
        let mut block = Block::from_interleaved(3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        ChannelMap::new(vec![3, 0, 1, 1]).process(&mut block);
        assert_eq!(block.channels(), 4);
        assert_eq!(block.as_slice(), &[3.0, 0.0, 1.0, 1.0, 6.0, 0.0, 4.0, 4.0]);
    }

    #[test]
    fn fit_truncates_and_pads() {
        let mut block = Block::from_interleaved(3, vec![1.0, 2.0, 3.0]);
        ChannelMap::fit(3, 2).process(&mut block);
        assert_eq!(block.as_slice(), &[1.0, 2.0]);
        ChannelMap::fit(2, 4).process(&mut block);
        assert_eq!(block.as_slice(), &[1.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn convert_rescales_into_target_units() {
        let mut block = Block::from_interleaved(1, vec![-32768.0, 16384.0]);
        Convert::new(Encoding::I16, Encoding::F64).process(&mut block);
        assert_relative_eq!(block.as_slice()[0], -1.0);
        assert_relative_eq!(block.as_slice()[1], 0.5);
    }
}
