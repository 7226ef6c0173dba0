//! First-order IIR sections: high-pass, low-pass, washout and integration.
//!
//! Poles are placed with the matched-z transform, `a = exp(-2π·fc/fs)`, so
//! a section's discrete time constant equals the analog `1 / (2π·fc)`.

use core::f64::consts::TAU;

use crate::error::{Error, Result};
use crate::sample::Block;

/// Pole of a first-order section with cutoff `cutoff` Hz at `rate` Hz.
pub(crate) fn pole(cutoff: f64, rate: u32) -> Result<f64> {
    let nyquist = rate as f64 / 2.0;
    if !(cutoff > 0.0 && cutoff < nyquist) {
        return Err(Error::validation(format!(
            "cutoff {cutoff} Hz must lie in (0, {nyquist}) for {rate} Hz"
        )));
    }
    Ok((-TAU * cutoff / rate as f64).exp())
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Section {
    a: f64,
    x1: f64,
    y1: f64,
}

impl Section {
    fn new(a: f64) -> Self {
        Self { a, ..Self::default() }
    }

    #[inline]
    fn highpass(&mut self, x: f64) -> f64 {
        let y = self.a * (self.y1 + x - self.x1);
        self.x1 = x;
        self.y1 = y;
        y
    }

    #[inline]
    fn lowpass(&mut self, x: f64) -> f64 {
        let y = self.y1 + (1.0 - self.a) * (x - self.y1);
        self.y1 = y;
        y
    }

    fn reset(&mut self) {
        *self = Self::new(self.a);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Pass {
    High,
    Low,
}

/// Cascade of first-order sections per channel.
#[derive(Clone, Debug)]
pub(crate) struct Cascade {
    pass: Pass,
    channels: Vec<Vec<Section>>,
}

impl Cascade {
    /// `specs[ch]` is `(order, cutoffs)`; unused cutoffs fall back to the first.
    pub fn new(pass: Pass, specs: &[Option<(usize, [f64; 3])>], rate: u32) -> Result<Self> {
        let channels = specs
            .iter()
            .map(|spec| match spec {
                None | Some((0, _)) => Ok(Vec::new()),
                Some((order, cutoff)) => (0..*order)
                    .map(|i| {
                        let fc = if cutoff[i] > 0.0 { cutoff[i] } else { cutoff[0] };
                        pole(fc, rate).map(Section::new)
                    })
                    .collect(),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { pass, channels })
    }

    pub fn process(&mut self, block: &mut Block) {
        for frame in block.iter_frames_mut() {
            for (s, sections) in frame.iter_mut().zip(self.channels.iter_mut()) {
                for section in sections.iter_mut() {
                    *s = match self.pass {
                        Pass::High => section.highpass(*s),
                        Pass::Low => section.lowpass(*s),
                    };
                }
            }
        }
    }

    pub fn reset(&mut self) {
        self.channels.iter_mut().flatten().for_each(Section::reset);
    }
}

/// Classical washout: a first-order high-pass that returns the platform to
/// neutral under sustained input.
#[derive(Clone, Debug)]
pub(crate) struct Washout {
    channels: Vec<Option<Section>>,
    time_constants: Vec<Option<f64>>,
}

impl Washout {
    pub fn new(cutoffs: &[Option<f64>], rate: u32) -> Result<Self> {
        let channels = cutoffs
            .iter()
            .map(|c| c.map(|fc| pole(fc, rate).map(Section::new)).transpose())
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            channels,
            time_constants: cutoffs.iter().map(|c| c.map(|fc| 1.0 / (TAU * fc))).collect(),
        })
    }

    /// Time constant in seconds of channel `ch`, if it is filtered.
    pub fn time_constant(&self, ch: usize) -> Option<f64> {
        self.time_constants.get(ch).copied().flatten()
    }

    pub fn process(&mut self, block: &mut Block) {
        for frame in block.iter_frames_mut() {
            for (s, section) in frame.iter_mut().zip(self.channels.iter_mut()) {
                if let Some(section) = section {
                    *s = section.highpass(*s);
                }
            }
        }
    }

    pub fn reset(&mut self) {
        self.channels.iter_mut().flatten().for_each(Section::reset);
    }
}

/// `order` cascaded accumulators, `y += x·dt`.
#[derive(Clone, Debug)]
pub(crate) struct Integral {
    dt: f64,
    channels: Vec<Vec<f64>>,
}

impl Integral {
    pub fn new(orders: &[Option<usize>], rate: u32) -> Self {
        Self {
            dt: 1.0 / rate as f64,
            channels: orders.iter().map(|o| vec![0.0; o.unwrap_or(0)]).collect(),
        }
    }

    pub fn process(&mut self, block: &mut Block) {
        let dt = self.dt;
        for frame in block.iter_frames_mut() {
            for (s, acc) in frame.iter_mut().zip(self.channels.iter_mut()) {
                for y in acc.iter_mut() {
                    *y += *s * dt;
                    *s = *y;
                }
            }
        }
    }

    pub fn reset(&mut self) {
        self.channels.iter_mut().flatten().for_each(|y| *y = 0.0);
    }
}
