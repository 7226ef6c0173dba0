//! Compiled filter stages and the build step that produces them.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::warn;

use crate::context::LOCK_BUDGET_DEFAULT;
use crate::error::{Error, Result};
use crate::format::{Format, FormatKind};
use crate::sample::Block;

use super::params::FilterParams;
use super::stages::iir::{Cascade, Integral, Pass, Washout};
use super::stages::motion::{Kinematics, Tilt};
use super::stages::routing::{ChannelMap, Combine, Convert};
use super::stages::shaping::{Affine, Limit, RateLimit};
use super::stages::smoothing::{Mean, Noise};
use super::FilterKind;

/// A caller-supplied block transform.
///
/// Closures taking `&mut Block` implement this directly.
pub trait CustomFilter: Send {
    /// Format this filter produces for `src`. Defaults to `src` unchanged.
    fn output_format(&mut self, src: &Format) -> Result<Format> {
        Ok(*src)
    }

    fn process(&mut self, block: &mut Block, src: &Format, dst: &Format);
}

impl<F> CustomFilter for F
where
    F: FnMut(&mut Block) + Send,
{
    fn process(&mut self, block: &mut Block, _src: &Format, _dst: &Format) {
        self(block)
    }
}

pub(crate) type SharedCustom = Arc<Mutex<dyn CustomFilter>>;

pub(crate) struct Custom {
    inner: SharedCustom,
    src: Format,
    dst: Format,
    budget: Duration,
}

impl Custom {
    /// Run the processor, or emit silence in the output format when an
    /// application thread holds it past the budget.
    fn process(&self, block: &mut Block) {
        match self.inner.try_lock_for(self.budget) {
            Some(mut processor) => processor.process(block, &self.src, &self.dst),
            None => {
                warn!("custom filter busy, block silenced");
                let frames = block.frames();
                block.reset(self.dst.channels());
                block.push_silence(frames);
            }
        }
    }
}

impl core::fmt::Debug for Custom {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Custom")
            .field("src", &self.src)
            .field("dst", &self.dst)
            .finish_non_exhaustive()
    }
}

/// One compiled processing step.
#[derive(Debug)]
pub(crate) enum Stage {
    Noise(Noise),
    Mean(Mean),
    Highpass(Cascade),
    Lowpass(Cascade),
    Integral(Integral),
    Tilt(Tilt),
    Affine(Affine),
    Combine(Combine),
    Limit(Limit),
    RateLimit(RateLimit),
    Washout(Washout),
    Kinematics(Kinematics),
    Convert(Convert),
    Channel(ChannelMap),
    Custom(Custom),
}

impl Stage {
    #[inline]
    pub fn process(&mut self, block: &mut Block) {
        match self {
            Stage::Noise(s) => s.process(block),
            Stage::Mean(s) => s.process(block),
            Stage::Highpass(s) | Stage::Lowpass(s) => s.process(block),
            Stage::Integral(s) => s.process(block),
            Stage::Tilt(s) => s.process(block),
            Stage::Affine(s) => s.process(block),
            Stage::Combine(s) => s.process(block),
            Stage::Limit(s) => s.process(block),
            Stage::RateLimit(s) => s.process(block),
            Stage::Washout(s) => s.process(block),
            Stage::Kinematics(s) => s.process(block),
            Stage::Convert(s) => s.process(block),
            Stage::Channel(s) => s.process(block),
            Stage::Custom(c) => c.process(block),
        }
    }

    /// Forget filter history, as if no samples had been processed.
    pub fn reset(&mut self) {
        match self {
            Stage::Noise(s) => s.reset(),
            Stage::Mean(s) => s.reset(),
            Stage::Highpass(s) | Stage::Lowpass(s) => s.reset(),
            Stage::Integral(s) => s.reset(),
            Stage::RateLimit(s) => s.reset(),
            Stage::Washout(s) => s.reset(),
            Stage::Tilt(_)
            | Stage::Affine(_)
            | Stage::Combine(_)
            | Stage::Limit(_)
            | Stage::Kinematics(_)
            | Stage::Convert(_)
            | Stage::Channel(_)
            | Stage::Custom(_) => {}
        }
    }

    /// Washout time constant of channel `ch` in seconds, when this is a washout stage.
    pub fn time_constant(&self, ch: usize) -> Option<f64> {
        match self {
            Stage::Washout(w) => w.time_constant(ch),
            _ => None,
        }
    }
}

/// Spread records over `channels`: one record applies everywhere, otherwise
/// record `i` belongs to channel `i` and the rest pass through.
pub(crate) fn per_channel<T: Clone>(records: &[T], channels: usize) -> Vec<Option<T>> {
    match records {
        [one] => vec![Some(one.clone()); channels],
        many => (0..channels).map(|ch| many.get(ch).cloned()).collect(),
    }
}

fn typed<T: Clone>(
    kind: FilterKind,
    records: &[FilterParams],
    channels: usize,
    pick: impl Fn(&FilterParams) -> Option<T>,
) -> Result<Vec<Option<T>>> {
    let values = records
        .iter()
        .map(|r| pick(r).ok_or_else(|| Error::validation(format!("{:?} record on a {kind:?} filter", r.kind()))))
        .collect::<Result<Vec<_>>>()?;
    Ok(per_channel(&values, channels))
}

/// Compile one filter node's own stage for input `src`.
///
/// Returns `None` for kinds that do no processing of their own, together
/// with the format the stage produces.
pub(crate) fn build(
    kind: FilterKind,
    records: &[FilterParams],
    custom: Option<&SharedCustom>,
    src: &Format,
) -> Result<(Option<Stage>, Format)> {
    let channels = src.channels();
    let rate = src.sample_rate();
    let defaults;
    let records = match (records.is_empty(), FilterParams::default_at(kind, rate)) {
        (true, Some(d)) => {
            defaults = [d];
            &defaults[..]
        }
        _ => records,
    };
    let full_scale = src.encoding().full_scale();

    let stage = match kind {
        FilterKind::Group => return Ok((None, *src)),
        FilterKind::Noise => Stage::Noise(Noise::new(&typed(kind, records, channels, |p| match p {
            FilterParams::Noise { covariance } => Some(*covariance),
            _ => None,
        })?)),
        FilterKind::Mean => Stage::Mean(Mean::new(&typed(kind, records, channels, |p| match p {
            FilterParams::Mean { count } => Some(*count),
            _ => None,
        })?)),
        FilterKind::Highpass => {
            let specs = typed(kind, records, channels, |p| match p {
                FilterParams::Highpass { order, cutoff } => Some((*order, *cutoff)),
                _ => None,
            })?;
            Stage::Highpass(Cascade::new(Pass::High, &specs, rate)?)
        }
        FilterKind::Lowpass => {
            let specs = typed(kind, records, channels, |p| match p {
                FilterParams::Lowpass { order, cutoff } => Some((*order, *cutoff)),
                _ => None,
            })?;
            Stage::Lowpass(Cascade::new(Pass::Low, &specs, rate)?)
        }
        FilterKind::Integral => {
            let orders = typed(kind, records, channels, |p| match p {
                FilterParams::Integral { order } => Some(*order),
                _ => None,
            })?;
            Stage::Integral(Integral::new(&orders, rate))
        }
        FilterKind::Tilt => Stage::Tilt(Tilt::new(channels, full_scale)?),
        FilterKind::Scale => Stage::Affine(Affine::scale(&typed(kind, records, channels, |p| match p {
            FilterParams::Scale { factor } => Some(*factor),
            _ => None,
        })?)),
        FilterKind::Offset => Stage::Affine(Affine::offset(&typed(kind, records, channels, |p| match p {
            FilterParams::Offset { value } => Some(*value),
            _ => None,
        })?)),
        FilterKind::Combine => {
            let ops = typed(kind, records, channels, |p| match p {
                FilterParams::Combine { mode, axis1, axis2 } => Some((*mode, *axis1, *axis2)),
                _ => None,
            })?;
            if let Some((_, a, b)) = ops.iter().flatten().find(|(_, a, b)| *a >= channels || *b >= channels) {
                return Err(Error::validation(format!(
                    "combine axes {} and {} outside {channels} channels",
                    a + 1,
                    b + 1
                )));
            }
            Stage::Combine(Combine::new(&ops))
        }
        FilterKind::Limit => Stage::Limit(Limit::new(&typed(kind, records, channels, |p| match p {
            FilterParams::Limit { min, max } => Some((*min, *max)),
            _ => None,
        })?)),
        FilterKind::RateLimit => Stage::RateLimit(RateLimit::new(&typed(kind, records, channels, |p| match p {
            FilterParams::RateLimit { max_rate } => Some(*max_rate),
            _ => None,
        })?)),
        FilterKind::Washout => {
            let cutoffs = typed(kind, records, channels, |p| match p {
                FilterParams::Washout { cutoff } => Some(*cutoff),
                _ => None,
            })?;
            Stage::Washout(Washout::new(&cutoffs, rate)?)
        }
        FilterKind::Kinematics => {
            let version = match records.first() {
                Some(FilterParams::Kinematics { version }) => *version,
                other => return Err(Error::validation(format!("{other:?} record on a kinematics filter"))),
            };
            let k = Kinematics::new(version, channels, full_scale)?;
            let dst = src.with_channels(k.channels()).with_kind(FormatKind::Axis);
            return Ok((Some(Stage::Kinematics(k)), dst));
        }
        FilterKind::Format => {
            let encoding = match records.first() {
                Some(FilterParams::Format { encoding }) => *encoding,
                other => return Err(Error::validation(format!("{other:?} record on a format filter"))),
            };
            let dst = src.with_encoding(encoding);
            return Ok((Some(Stage::Convert(Convert::new(src.encoding(), encoding))), dst));
        }
        FilterKind::Channel => {
            let axes = records
                .iter()
                .map(|r| match r {
                    FilterParams::Channel { axis } if *axis <= channels => Ok(*axis),
                    FilterParams::Channel { axis } => Err(Error::validation(format!(
                        "source axis {axis} outside {channels} channels"
                    ))),
                    other => Err(Error::validation(format!("{:?} record on a channel filter", other.kind()))),
                })
                .collect::<Result<Vec<_>>>()?;
            let map = match axes.as_slice() {
                [one] => vec![*one; channels],
                many => many.to_vec(),
            };
            let dst = src.with_channels(map.len());
            return Ok((Some(Stage::Channel(ChannelMap::new(map))), dst));
        }
        FilterKind::Custom => {
            let inner = custom
                .cloned()
                .ok_or_else(|| Error::validation("custom filter has no processor"))?;
            let dst = inner.lock().output_format(src)?;
            let stage = Custom {
                inner,
                src: *src,
                dst,
                budget: LOCK_BUDGET_DEFAULT,
            };
            return Ok((Some(Stage::Custom(stage)), dst));
        }
    };
    Ok((Some(stage), *src))
}

/// Stages that turn `from` into `to`: channel fit then encoding conversion.
pub(crate) fn adapter(from: &Format, to: &Format) -> Vec<Stage> {
    let mut stages = Vec::new();
    if from.channels() != to.channels() {
        stages.push(Stage::Channel(ChannelMap::fit(from.channels(), to.channels())));
    }
    if from.encoding() != to.encoding() {
        stages.push(Stage::Convert(Convert::new(from.encoding(), to.encoding())));
    }
    stages
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::filter::params::CombineMode;
    use crate::format::Encoding;

    fn fmt(channels: usize) -> Format {
        Format::new(50, channels, Encoding::I16).unwrap()
    }

    #[test]
    fn single_record_broadcasts() {
        assert_eq!(per_channel(&[7], 3), vec![Some(7), Some(7), Some(7)]);
        assert_eq!(per_channel(&[1, 2], 3), vec![Some(1), Some(2), None]);
    }

    #[test]
    fn mismatched_record_is_rejected() {
        let err = build(FilterKind::Scale, &[FilterParams::Offset { value: 1.0 }], None, &fmt(3));
        assert!(err.is_err());
    }

    #[test]
    fn empty_records_use_defaults() {
        let (stage, dst) = build(FilterKind::Limit, &[], None, &fmt(2)).unwrap();
        let mut block = Block::from_interleaved(2, vec![40_000.0, -40_000.0]);
        stage.unwrap().process(&mut block);
        assert_eq!(block.as_slice(), &[32767.0, -32768.0]);
        assert_eq!(dst, fmt(2));
    }

    #[test]
    fn channel_records_set_output_width() {
        let records = [FilterParams::Channel { axis: 2 }, FilterParams::Channel { axis: 0 }];
        let (_, dst) = build(FilterKind::Channel, &records, None, &fmt(3)).unwrap();
        assert_eq!(dst.channels(), 2);
        assert!(build(FilterKind::Channel, &[FilterParams::Channel { axis: 4 }], None, &fmt(3)).is_err());
    }

    #[test]
    fn combine_axes_are_checked_against_the_input() {
        let rec = FilterParams::Combine {
            mode: CombineMode::Add,
            axis1: 0,
            axis2: 3,
        };
        assert!(build(FilterKind::Combine, &[rec], None, &fmt(3)).is_err());
    }

    #[test]
    fn kinematics_outputs_axis_lengths() {
        let (_, dst) = build(FilterKind::Kinematics, &[], None, &fmt(6)).unwrap();
        assert_eq!(dst.kind(), FormatKind::Axis);
        assert_eq!(dst.channels(), 6);
    }

    #[test]
    fn custom_closures_run_in_place() {
        let custom: SharedCustom = Arc::new(Mutex::new(|b: &mut Block| b.scale(-1.0)));
        let (stage, _) = build(FilterKind::Custom, &[], Some(&custom), &fmt(1)).unwrap();
        let mut block = Block::from_interleaved(1, vec![3.0]);
        stage.unwrap().process(&mut block);
        assert_eq!(block.as_slice(), &[-3.0]);
    }

    #[test]
    fn default_cutoffs_fit_slow_rates() {
        let slow = Format::new(10, 1, Encoding::I16).unwrap();
        for kind in [FilterKind::Highpass, FilterKind::Lowpass, FilterKind::Washout] {
            assert!(build(kind, &[], None, &slow).is_ok(), "{kind:?}");
        }
        let (stage, _) = build(FilterKind::Washout, &[], None, &slow).unwrap();
        let tau = stage.unwrap().time_constant(0).unwrap();
        assert_relative_eq!(tau, 1.0 / (std::f64::consts::TAU * 4.5));

        let explicit = FilterParams::Washout { cutoff: 5.0 };
        assert!(build(FilterKind::Washout, &[explicit], None, &slow).is_err());
    }

    #[test]
    fn held_custom_processor_yields_silence() {
        let custom: SharedCustom = Arc::new(Mutex::new(|b: &mut Block| b.scale(-1.0)));
        let (stage, _) = build(FilterKind::Custom, &[], Some(&custom), &fmt(1)).unwrap();
        let mut stage = stage.unwrap();
        let held = custom.lock();
        let mut block = Block::from_interleaved(1, vec![3.0, 4.0]);
        stage.process(&mut block);
        drop(held);
        assert_eq!(block.as_slice(), &[0.0, 0.0]);
        let mut block = Block::from_interleaved(1, vec![3.0]);
        stage.process(&mut block);
        assert_eq!(block.as_slice(), &[-3.0]);
    }

    #[test]
    fn adapter_fits_channels_then_encoding() {
        let to = Format::new(50, 2, Encoding::F32).unwrap();
        let mut block = Block::from_interleaved(3, vec![16384.0, 0.0, 5.0]);
        for mut s in adapter(&fmt(3), &to) {
            s.process(&mut block);
        }
        assert_eq!(block.channels(), 2);
        assert!((block.as_slice()[0] - 0.5).abs() < 1e-9);
    }
}
