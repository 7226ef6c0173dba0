//! Typed filter parameters and their packed record layout.
//!
//! Each [`FilterKind`] that takes parameters has one [`FilterParams`]
//! variant. The raw form mirrors the packed little-endian records used by
//! motion files and foreign callers: `i32` and `f32` fields, four bytes each.

use crate::error::{Error, Result};
use crate::format::{Encoding, CHANNELS_MAX, MOTION_MAX_16, MOTION_MIN_16};

use super::FilterKind;

/// Largest moving-average window.
pub const MEAN_MAX: usize = 16;
pub const HIGHPASS_ORDER_MAX: usize = 3;
pub const LOWPASS_ORDER_MAX: usize = 2;
pub const INTEGRAL_ORDER_MAX: usize = 3;
pub const COVARIANCE_MAX: f64 = 100.0;
/// Default cutoffs are held below this fraction of the sample rate.
pub const DEFAULT_CUTOFF_RATIO: f64 = 0.45;

/// How a combine filter merges its two source axes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CombineMode {
    /// Copy the first axis.
    #[default]
    Pass,
    Add,
    Subtract,
    Multiply,
    Average,
    Max,
    Min,
}

impl CombineMode {
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => CombineMode::Pass,
            1 => CombineMode::Add,
            2 => CombineMode::Subtract,
            3 => CombineMode::Multiply,
            4 => CombineMode::Average,
            5 => CombineMode::Max,
            6 => CombineMode::Min,
            _ => return None,
        })
    }

    pub fn code(self) -> i32 {
        match self {
            CombineMode::Pass => 0,
            CombineMode::Add => 1,
            CombineMode::Subtract => 2,
            CombineMode::Multiply => 3,
            CombineMode::Average => 4,
            CombineMode::Max => 5,
            CombineMode::Min => 6,
        }
    }

    #[inline]
    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            CombineMode::Pass => a,
            CombineMode::Add => a + b,
            CombineMode::Subtract => a - b,
            CombineMode::Multiply => a * b,
            CombineMode::Average => (a + b) * 0.5,
            CombineMode::Max => a.max(b),
            CombineMode::Min => a.min(b),
        }
    }
}

/// Platform geometry used by the kinematics filter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum KinematicsVersion {
    #[default]
    V700,
    V800,
    V1000,
}

impl KinematicsVersion {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            700 => Some(KinematicsVersion::V700),
            800 => Some(KinematicsVersion::V800),
            1000 => Some(KinematicsVersion::V1000),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            KinematicsVersion::V700 => 700,
            KinematicsVersion::V800 => 800,
            KinematicsVersion::V1000 => 1000,
        }
    }
}

/// Parameters for one channel of a filter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FilterParams {
    Noise { covariance: f64 },
    Mean { count: usize },
    Highpass { order: usize, cutoff: [f64; 3] },
    Lowpass { order: usize, cutoff: [f64; 3] },
    Integral { order: usize },
    Scale { factor: f64 },
    Offset { value: f64 },
    /// Axes are zero-based channel indices.
    Combine { mode: CombineMode, axis1: usize, axis2: usize },
    Limit { min: f64, max: f64 },
    /// Largest change between consecutive samples, in sample units.
    RateLimit { max_rate: f64 },
    Washout { cutoff: f64 },
    Kinematics { version: KinematicsVersion },
    Format { encoding: Encoding },
    /// One-based source axis; 0 produces a zero signal.
    Channel { axis: usize },
}

impl FilterParams {
    /// The filter kind these parameters belong to.
    pub fn kind(&self) -> FilterKind {
        match self {
            FilterParams::Noise { .. } => FilterKind::Noise,
            FilterParams::Mean { .. } => FilterKind::Mean,
            FilterParams::Highpass { .. } => FilterKind::Highpass,
            FilterParams::Lowpass { .. } => FilterKind::Lowpass,
            FilterParams::Integral { .. } => FilterKind::Integral,
            FilterParams::Scale { .. } => FilterKind::Scale,
            FilterParams::Offset { .. } => FilterKind::Offset,
            FilterParams::Combine { .. } => FilterKind::Combine,
            FilterParams::Limit { .. } => FilterKind::Limit,
            FilterParams::RateLimit { .. } => FilterKind::RateLimit,
            FilterParams::Washout { .. } => FilterKind::Washout,
            FilterParams::Kinematics { .. } => FilterKind::Kinematics,
            FilterParams::Format { .. } => FilterKind::Format,
            FilterParams::Channel { .. } => FilterKind::Channel,
        }
    }

    /// Default record for `kind`, or `None` for kinds without parameters.
    pub fn default_for(kind: FilterKind) -> Option<Self> {
        Some(match kind {
            FilterKind::Noise => FilterParams::Noise { covariance: 5.0 },
            FilterKind::Mean => FilterParams::Mean { count: 4 },
            FilterKind::Highpass => FilterParams::Highpass { order: 1, cutoff: [5.0; 3] },
            FilterKind::Lowpass => FilterParams::Lowpass { order: 1, cutoff: [5.0; 3] },
            FilterKind::Integral => FilterParams::Integral { order: 1 },
            FilterKind::Scale => FilterParams::Scale { factor: 1.0 },
            FilterKind::Offset => FilterParams::Offset { value: 0.0 },
            FilterKind::Combine => FilterParams::Combine {
                mode: CombineMode::Pass,
                axis1: 0,
                axis2: 0,
            },
            FilterKind::Limit => FilterParams::Limit {
                min: MOTION_MIN_16,
                max: MOTION_MAX_16,
            },
            FilterKind::RateLimit => FilterParams::RateLimit { max_rate: 256.0 },
            FilterKind::Washout => FilterParams::Washout { cutoff: 5.0 },
            FilterKind::Kinematics => FilterParams::Kinematics {
                version: KinematicsVersion::V700,
            },
            FilterKind::Format => FilterParams::Format {
                encoding: Encoding::I16,
            },
            FilterKind::Channel => FilterParams::Channel { axis: 1 },
            FilterKind::Group | FilterKind::Tilt | FilterKind::Custom => return None,
        })
    }

    /// Default record for `kind` at `rate` Hz, with cutoffs kept below Nyquist.
    pub fn default_at(kind: FilterKind, rate: u32) -> Option<Self> {
        let ceiling = rate as f64 * DEFAULT_CUTOFF_RATIO;
        Some(match Self::default_for(kind)? {
            FilterParams::Highpass { order, cutoff } => FilterParams::Highpass {
                order,
                cutoff: cutoff.map(|c| c.min(ceiling)),
            },
            FilterParams::Lowpass { order, cutoff } => FilterParams::Lowpass {
                order,
                cutoff: cutoff.map(|c| c.min(ceiling)),
            },
            FilterParams::Washout { cutoff } => FilterParams::Washout {
                cutoff: cutoff.min(ceiling),
            },
            other => other,
        })
    }

    /// Size in bytes of one packed record for `kind`.
    pub fn record_size(kind: FilterKind) -> Option<usize> {
        Some(match kind {
            FilterKind::Highpass | FilterKind::Lowpass => 16,
            FilterKind::Combine => 12,
            FilterKind::Limit => 8,
            FilterKind::Noise
            | FilterKind::Mean
            | FilterKind::Integral
            | FilterKind::Scale
            | FilterKind::Offset
            | FilterKind::RateLimit
            | FilterKind::Washout
            | FilterKind::Kinematics
            | FilterKind::Format
            | FilterKind::Channel => 4,
            FilterKind::Group | FilterKind::Tilt | FilterKind::Custom => return None,
        })
    }

    /// Range checks that do not depend on the connected format.
    pub fn validate(&self) -> Result<()> {
        let ok = match *self {
            FilterParams::Noise { covariance } => (0.0..=COVARIANCE_MAX).contains(&covariance),
            FilterParams::Mean { count } => count <= MEAN_MAX,
            FilterParams::Highpass { order, cutoff } => {
                order <= HIGHPASS_ORDER_MAX && cutoffs_ok(order, &cutoff)
            }
            FilterParams::Lowpass { order, cutoff } => {
                order <= LOWPASS_ORDER_MAX && cutoffs_ok(order, &cutoff)
            }
            FilterParams::Integral { order } => order <= INTEGRAL_ORDER_MAX,
            FilterParams::Scale { factor } => factor.is_finite(),
            FilterParams::Offset { value } => value.is_finite(),
            FilterParams::Combine { axis1, axis2, .. } => axis1 < CHANNELS_MAX && axis2 < CHANNELS_MAX,
            FilterParams::Limit { min, max } => min.is_finite() && max.is_finite() && min <= max,
            FilterParams::RateLimit { max_rate } => (0.0..=MOTION_MAX_16).contains(&max_rate),
            FilterParams::Washout { cutoff } => cutoff.is_finite() && cutoff > 0.0,
            FilterParams::Kinematics { .. } | FilterParams::Format { .. } => true,
            FilterParams::Channel { axis } => axis <= 255,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::validation(format!("parameters out of range: {self:?}")))
        }
    }

    /// Decode one packed record.
    pub fn decode(kind: FilterKind, record: &[u8]) -> Result<Self> {
        let size = Self::record_size(kind)
            .ok_or_else(|| Error::validation(format!("{kind:?} filters take no parameters")))?;
        if record.len() != size {
            return Err(Error::validation(format!(
                "{kind:?} record is {size} bytes, got {}",
                record.len()
            )));
        }
        let int = |i: usize| i32::from_le_bytes([record[i], record[i + 1], record[i + 2], record[i + 3]]);
        let float = |i: usize| f32::from_le_bytes([record[i], record[i + 1], record[i + 2], record[i + 3]]) as f64;
        let count = |v: i32| usize::try_from(v).map_err(|_| Error::validation(format!("negative count {v}")));

        let params = match kind {
            FilterKind::Noise => FilterParams::Noise {
                covariance: int(0) as f64,
            },
            FilterKind::Mean => FilterParams::Mean { count: count(int(0))? },
            FilterKind::Highpass => FilterParams::Highpass {
                order: count(int(0))?,
                cutoff: [float(4), float(8), float(12)],
            },
            FilterKind::Lowpass => FilterParams::Lowpass {
                order: count(int(0))?,
                cutoff: [float(4), float(8), float(12)],
            },
            FilterKind::Integral => FilterParams::Integral { order: count(int(0))? },
            FilterKind::Scale => FilterParams::Scale { factor: float(0) },
            FilterKind::Offset => FilterParams::Offset { value: float(0) },
            FilterKind::Combine => {
                let mode = CombineMode::from_code(int(0))
                    .ok_or_else(|| Error::validation(format!("unknown combine mode {}", int(0))))?;
                let axis = |v: i32| {
                    count(v)?
                        .checked_sub(1)
                        .ok_or_else(|| Error::validation("combine axes are numbered from 1"))
                };
                FilterParams::Combine {
                    mode,
                    axis1: axis(int(4))?,
                    axis2: axis(int(8))?,
                }
            }
            FilterKind::Limit => FilterParams::Limit {
                min: int(0) as f64,
                max: int(4) as f64,
            },
            FilterKind::RateLimit => FilterParams::RateLimit {
                max_rate: int(0) as f64,
            },
            FilterKind::Washout => FilterParams::Washout { cutoff: float(0) },
            FilterKind::Kinematics => FilterParams::Kinematics {
                version: KinematicsVersion::from_code(int(0))
                    .ok_or_else(|| Error::validation(format!("unknown kinematics version {}", int(0))))?,
            },
            FilterKind::Format => FilterParams::Format {
                encoding: Encoding::from_code(int(0))
                    .ok_or_else(|| Error::validation(format!("unknown data format {:#x}", int(0))))?,
            },
            FilterKind::Channel => FilterParams::Channel { axis: count(int(0))? },
            FilterKind::Group | FilterKind::Tilt | FilterKind::Custom => {
                return Err(Error::validation(format!("{kind:?} filters take no parameters")))
            }
        };
        params.validate()?;
        Ok(params)
    }

    /// Append the packed record for these parameters to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match *self {
            FilterParams::Noise { covariance } => push_i32(out, covariance.round() as i32),
            FilterParams::Mean { count } => push_i32(out, count as i32),
            FilterParams::Integral { order } => push_i32(out, order as i32),
            FilterParams::Combine { mode, axis1, axis2 } => {
                push_i32(out, mode.code());
                push_i32(out, axis1 as i32 + 1);
                push_i32(out, axis2 as i32 + 1);
            }
            FilterParams::Limit { min, max } => {
                push_i32(out, min.round() as i32);
                push_i32(out, max.round() as i32);
            }
            FilterParams::RateLimit { max_rate } => push_i32(out, max_rate.round() as i32),
            FilterParams::Kinematics { version } => push_i32(out, version.code()),
            FilterParams::Format { encoding } => push_i32(out, encoding.code()),
            FilterParams::Channel { axis } => push_i32(out, axis as i32),
            FilterParams::Highpass { order, cutoff } | FilterParams::Lowpass { order, cutoff } => {
                push_i32(out, order as i32);
                cutoff.iter().for_each(|c| push_f32(out, *c));
            }
            FilterParams::Scale { factor: v }
            | FilterParams::Offset { value: v }
            | FilterParams::Washout { cutoff: v } => push_f32(out, v),
        }
    }
}

#[inline]
fn push_i32(out: &mut Vec<u8>, v: i32) {
    out.extend_from_slice(&v.to_le_bytes());
}

#[inline]
fn push_f32(out: &mut Vec<u8>, v: f64) {
    out.extend_from_slice(&(v as f32).to_le_bytes());
}

fn cutoffs_ok(order: usize, cutoff: &[f64; 3]) -> bool {
    cutoff[..order].iter().all(|c| c.is_finite() && *c >= 0.0) && (order == 0 || cutoff[0] > 0.0)
}

/// Decode `count` packed records of `size` bytes each.
pub fn decode_records(kind: FilterKind, data: &[u8], size: usize, count: usize) -> Result<Vec<FilterParams>> {
    let expected = FilterParams::record_size(kind)
        .ok_or_else(|| Error::validation(format!("{kind:?} filters take no parameters")))?;
    if size != expected {
        return Err(Error::validation(format!(
            "{kind:?} record size is {expected}, caller passed {size}"
        )));
    }
    check_count(count)?;
    if data.len() != size * count {
        return Err(Error::validation(format!(
            "{} bytes do not hold {count} records of {size}",
            data.len()
        )));
    }
    data.chunks_exact(size)
        .map(|record| FilterParams::decode(kind, record))
        .collect()
}

pub(crate) fn check_count(count: usize) -> Result<()> {
    if count == 0 || count > CHANNELS_MAX {
        return Err(Error::validation(format!(
            "parameter count {count} outside 1..={CHANNELS_MAX}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_decode_with_one_based_axes() {
        let mut raw = Vec::new();
        FilterParams::Combine {
            mode: CombineMode::Add,
            axis1: 0,
            axis2: 2,
        }
        .encode(&mut raw);
        assert_eq!(raw.len(), 12);
        assert_eq!(&raw[4..8], &1i32.to_le_bytes());

        let decoded = decode_records(FilterKind::Combine, &raw, 12, 1).unwrap();
        assert_eq!(
            decoded,
            vec![FilterParams::Combine {
                mode: CombineMode::Add,
                axis1: 0,
                axis2: 2
            }]
        );
    }

    #[test]
    fn wrong_record_size_is_rejected() {
        let raw = 2.0f32.to_le_bytes();
        assert!(decode_records(FilterKind::Scale, &raw, 4, 1).is_ok());
        assert!(decode_records(FilterKind::Scale, &[0u8; 8], 8, 1).is_err());
        assert!(decode_records(FilterKind::Scale, &raw, 4, 2).is_err());
        assert!(decode_records(FilterKind::Tilt, &raw, 4, 1).is_err());
    }

    #[test]
    fn counts_are_bounded_by_channel_max() {
        assert!(check_count(0).is_err());
        assert!(check_count(CHANNELS_MAX).is_ok());
        assert!(check_count(CHANNELS_MAX + 1).is_err());
    }

    #[test]
    fn ranges_follow_record_documentation() {
        assert!(FilterParams::Mean { count: 17 }.validate().is_err());
        assert!(FilterParams::Lowpass { order: 3, cutoff: [5.0; 3] }.validate().is_err());
        assert!(FilterParams::Highpass { order: 3, cutoff: [5.0; 3] }.validate().is_ok());
        assert!(FilterParams::Noise { covariance: 101.0 }.validate().is_err());
        assert!(FilterParams::Limit { min: 1.0, max: -1.0 }.validate().is_err());
    }

    #[test]
    fn every_parameterized_kind_has_a_default() {
        for kind in FilterKind::ALL {
            assert_eq!(
                FilterParams::default_for(kind).is_some(),
                FilterParams::record_size(kind).is_some(),
                "{kind:?}"
            );
        }
    }
}
