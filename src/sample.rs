//! Interleaved sample blocks and the byte codec for every [`Encoding`].
//!
//! Filters work on [`Block`]s of `f64` values kept in the native units of
//! the encoding they came from, so an `i16` sample of 1000 is `1000.0`.
//! Conversions between encodings go through the normalized `[-1, 1)` domain.

use dasp_sample::{FromSample, Sample};

use crate::error::Result;
use crate::format::{Encoding, Format};

/// A run of interleaved frames.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Block {
    channels: usize,
    data: Vec<f64>,
}

impl Block {
    pub fn new(channels: usize) -> Self {
        Self {
            channels: channels.max(1),
            data: Vec::new(),
        }
    }

    pub fn with_capacity(channels: usize, frames: usize) -> Self {
        let channels = channels.max(1);
        Self {
            channels,
            data: Vec::with_capacity(channels * frames),
        }
    }

    /// A block of `frames` zeroed frames.
    pub fn silence(channels: usize, frames: usize) -> Self {
        let channels = channels.max(1);
        Self {
            channels,
            data: vec![0.0; channels * frames],
        }
    }

    /// Build a block from interleaved values. Trailing partial frames are dropped.
    pub fn from_interleaved(channels: usize, mut data: Vec<f64>) -> Self {
        let channels = channels.max(1);
        data.truncate(data.len() - data.len() % channels);
        Self { channels, data }
    }

    /// Decode `bytes` laid out in `format`.
    pub fn decode(format: &Format, bytes: &[u8]) -> Result<Self> {
        let mut block = Block::new(format.channels());
        block.decode_from(format, bytes)?;
        Ok(block)
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.data.len() / self.channels
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    #[inline]
    pub fn frame(&self, index: usize) -> &[f64] {
        let start = index * self.channels;
        &self.data[start..start + self.channels]
    }

    #[inline]
    pub fn frame_mut(&mut self, index: usize) -> &mut [f64] {
        let start = index * self.channels;
        &mut self.data[start..start + self.channels]
    }

    pub fn iter_frames(&self) -> core::slice::ChunksExact<'_, f64> {
        self.data.chunks_exact(self.channels)
    }

    pub fn iter_frames_mut(&mut self) -> core::slice::ChunksExactMut<'_, f64> {
        self.data.chunks_exact_mut(self.channels)
    }

    pub fn push_frame(&mut self, frame: &[f64]) {
        for ch in 0..self.channels {
            self.data.push(frame.get(ch).copied().unwrap_or(0.0));
        }
    }

    pub fn push_silence(&mut self, frames: usize) {
        self.data.resize(self.data.len() + frames * self.channels, 0.0);
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Clear and change the channel count, keeping the allocation.
    pub(crate) fn reset(&mut self, channels: usize) {
        self.channels = channels.max(1);
        self.data.clear();
    }

    pub fn fill(&mut self, value: f64) {
        self.data.iter_mut().for_each(|s| *s = value);
    }

    /// Multiply every sample by `gain`.
    pub fn scale(&mut self, gain: f64) {
        if gain != 1.0 {
            self.data.iter_mut().for_each(|s| *s *= gain);
        }
    }

    /// Replace the contents with `bytes` decoded in `format`.
    pub fn decode_from(&mut self, format: &Format, bytes: &[u8]) -> Result<()> {
        let frames = format.frames_in(bytes.len())?;
        let encoding = format.encoding();
        let width = encoding.bytes_per_sample();
        self.reset(format.channels());
        self.data.reserve(frames * format.channels());
        for chunk in bytes.chunks_exact(width) {
            self.data.push(read_sample(chunk, encoding));
        }
        Ok(())
    }

    /// Append every frame as bytes in `format`, saturating to the encoding's range.
    ///
    /// Channels beyond the block's count are written as zero; extra block
    /// channels are dropped.
    pub fn encode_into(&self, format: &Format, out: &mut Vec<u8>) {
        let encoding = format.encoding();
        out.reserve(self.frames() * format.block_align());
        for frame in self.iter_frames() {
            for ch in 0..format.channels() {
                write_sample(frame.get(ch).copied().unwrap_or(0.0), encoding, out);
            }
        }
    }
}

/// Read one little-endian sample in native units.
pub fn read_sample(bytes: &[u8], encoding: Encoding) -> f64 {
    match encoding {
        Encoding::I8 => i8::from_le_bytes([bytes[0]]) as f64,
        Encoding::I16 => i16::from_le_bytes(take(bytes)) as f64,
        Encoding::I32 => i32::from_le_bytes(take(bytes)) as f64,
        Encoding::I64 => i64::from_le_bytes(take(bytes)) as f64,
        Encoding::F32 => f32::from_le_bytes(take(bytes)) as f64,
        Encoding::F64 => f64::from_le_bytes(take(bytes)),
    }
}

/// Append one sample, rounding integers and saturating to the encoding's range.
/// Non-finite values are written as zero.
pub fn write_sample(value: f64, encoding: Encoding, out: &mut Vec<u8>) {
    let value = if value.is_finite() { value } else { 0.0 };
    match encoding {
        Encoding::I8 => out.extend_from_slice(&(value.round() as i8).to_le_bytes()),
        Encoding::I16 => out.extend_from_slice(&(value.round() as i16).to_le_bytes()),
        Encoding::I32 => out.extend_from_slice(&(value.round() as i32).to_le_bytes()),
        Encoding::I64 => out.extend_from_slice(&(value.round() as i64).to_le_bytes()),
        Encoding::F32 => out.extend_from_slice(&(value as f32).to_le_bytes()),
        Encoding::F64 => out.extend_from_slice(&value.to_le_bytes()),
    }
}

/// Saturate a native value to what `encoding` can hold.
#[inline]
pub fn saturate(value: f64, encoding: Encoding) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let (min, max) = encoding.range();
    value.clamp(min, max)
}

/// Convert a native value from one encoding to another via the normalized domain.
pub fn convert(value: f64, from: Encoding, to: Encoding) -> f64 {
    if from == to {
        return value;
    }
    let norm: f64 = match from {
        Encoding::I8 => (value.round() as i8).to_sample::<f64>(),
        Encoding::I16 => (value.round() as i16).to_sample::<f64>(),
        Encoding::I32 => (value.round() as i32).to_sample::<f64>(),
        Encoding::I64 => (value.round() as i64).to_sample::<f64>(),
        Encoding::F32 => (value as f32).to_sample::<f64>(),
        Encoding::F64 => value,
    };
    let norm = if norm.is_finite() { norm.clamp(-1.0, 1.0) } else { 0.0 };
    match to {
        Encoding::I8 => i8::from_sample(norm) as f64,
        Encoding::I16 => i16::from_sample(norm) as f64,
        Encoding::I32 => i32::from_sample(norm) as f64,
        Encoding::I64 => i64::from_sample(norm) as f64,
        Encoding::F32 => f32::from_sample(norm) as f64,
        Encoding::F64 => norm,
    }
}

#[inline]
fn take<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}
