//! Sample formats and the constants that bound them.

use crate::error::{Error, Result};

/// Maximum number of channels in a frame (6 DOF plus 2 extra).
pub const CHANNELS_MAX: usize = 8;
/// Highest accepted sample rate in Hz.
pub const SAMPLE_RATE_MAX: u32 = 1000;

pub const SAMPLE_RATE_DEFAULT: u32 = 50;
pub const CHANNELS_DEFAULT: usize = 3;
/// Frames pulled from every source on each mixer tick.
pub const SAMPLES_DEFAULT: usize = 2;
pub const BUFFERS_DEFAULT: usize = 1;

/// Largest finite loop count.
pub const LOOP_MAX: u8 = 254;
/// Loop count meaning "loop until stopped".
pub const LOOP_INFINITE: u8 = 255;

/// Full-scale value of a 16-bit motion sample.
pub const MOTION_MAX_16: f64 = 32767.0;
pub const MOTION_MIN_16: f64 = -32768.0;

/// Encoding of a single sample value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Encoding {
    I8,
    #[default]
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl Encoding {
    #[inline]
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Encoding::I8 => 1,
            Encoding::I16 => 2,
            Encoding::I32 | Encoding::F32 => 4,
            Encoding::I64 | Encoding::F64 => 8,
        }
    }

    #[inline]
    pub fn is_float(self) -> bool {
        matches!(self, Encoding::F32 | Encoding::F64)
    }

    /// Range of representable values in native units.
    pub fn range(self) -> (f64, f64) {
        match self {
            Encoding::I8 => (i8::MIN as f64, i8::MAX as f64),
            Encoding::I16 => (i16::MIN as f64, i16::MAX as f64),
            Encoding::I32 => (i32::MIN as f64, i32::MAX as f64),
            Encoding::I64 => (i64::MIN as f64, i64::MAX as f64),
            Encoding::F32 => (f32::MIN as f64, f32::MAX as f64),
            Encoding::F64 => (f64::MIN, f64::MAX),
        }
    }

    /// Magnitude that maps to 1.0 in the normalized domain.
    pub fn full_scale(self) -> f64 {
        match self {
            Encoding::I8 => 128.0,
            Encoding::I16 => 32768.0,
            Encoding::I32 => 2147483648.0,
            Encoding::I64 => 9223372036854775808.0,
            Encoding::F32 | Encoding::F64 => 1.0,
        }
    }

    /// Decodes the `IM_FORMAT_DATA_*` codes used by the original wire records.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0x8008 => Some(Encoding::I8),
            0x8010 => Some(Encoding::I16),
            0x8020 => Some(Encoding::I32),
            0x8040 => Some(Encoding::I64),
            0x8120 => Some(Encoding::F32),
            0x8140 => Some(Encoding::F64),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Encoding::I8 => 0x8008,
            Encoding::I16 => 0x8010,
            Encoding::I32 => 0x8020,
            Encoding::I64 => 0x8040,
            Encoding::F32 => 0x8120,
            Encoding::F64 => 0x8140,
        }
    }
}

/// What the channels of a frame describe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum FormatKind {
    /// Platform degrees of freedom (mm, degrees).
    #[default]
    Dof,
    /// Actuator lengths (mm).
    Axis,
}

/// Sample rate, channel layout and encoding of a stream of frames.
///
/// `block_align` is derived, never stored, so it cannot drift from the
/// channel count and encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Format {
    sample_rate: u32,
    channels: usize,
    encoding: Encoding,
    kind: FormatKind,
}

impl Format {
    /// Create a validated format.
    pub fn new(sample_rate: u32, channels: usize, encoding: Encoding) -> Result<Self> {
        if sample_rate == 0 || sample_rate > SAMPLE_RATE_MAX {
            return Err(Error::validation(format!(
                "sample rate {sample_rate} outside 1..={SAMPLE_RATE_MAX}"
            )));
        }
        if channels == 0 || channels > CHANNELS_MAX {
            return Err(Error::validation(format!(
                "channel count {channels} outside 1..={CHANNELS_MAX}"
            )));
        }
        Ok(Self {
            sample_rate,
            channels,
            encoding,
            kind: FormatKind::Dof,
        })
    }

    pub fn with_kind(mut self, kind: FormatKind) -> Self {
        self.kind = kind;
        self
    }

    pub(crate) fn with_channels(mut self, channels: usize) -> Self {
        self.channels = channels.clamp(1, CHANNELS_MAX);
        self
    }

    pub(crate) fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub(crate) fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate.clamp(1, SAMPLE_RATE_MAX);
        self
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    #[inline]
    pub fn kind(&self) -> FormatKind {
        self.kind
    }

    /// Bytes per interleaved frame.
    #[inline]
    pub fn block_align(&self) -> usize {
        self.channels * self.encoding.bytes_per_sample()
    }

    /// Number of whole frames in `bytes`, or a validation error if `bytes`
    /// is not a multiple of `block_align`.
    pub fn frames_in(&self, bytes: usize) -> Result<usize> {
        let align = self.block_align();
        if bytes % align != 0 {
            return Err(Error::validation(format!(
                "byte size {bytes} is not a multiple of block align {align}"
            )));
        }
        Ok(bytes / align)
    }

    /// Milliseconds covered by `frames` at this rate (truncating).
    #[inline]
    pub fn frames_to_ms(&self, frames: u64) -> u64 {
        frames * 1000 / self.sample_rate as u64
    }
}

impl Default for Format {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE_DEFAULT,
            channels: CHANNELS_DEFAULT,
            encoding: Encoding::default(),
            kind: FormatKind::Dof,
        }
    }
}
