//! Windowed histograms.
//!
//! Three flavors share the same slot layout:
//! - [`TimeWindowHistogram`], a ring of sub-histograms that decays recorded values after an
//!   expiry period;
//! - [`CumulativeHistogram`], whose bucket counts never decay while its percentiles decay through
//!   a ring, for cumulative export;
//! - [`StepHistogram`], which keeps the step in progress and the last closed step, for delta
//!   export.
//!
//! A slot carries fixed-boundary bucket counts, log-linear counts for percentiles, or both,
//! depending on the [`DistributionConfig`].
use std::{fmt, sync::Arc, time::Duration};

mod buckets;
mod config;
mod cumulative;
mod fixed;
mod log_linear;
mod ring;
mod snapshot;
mod step;

pub use self::buckets::percentile_buckets;
pub use self::config::{DistributionConfig, HistogramConfigError};
pub use self::cumulative::CumulativeHistogram;
pub use self::fixed::{cumulative, FixedBoundaryCounts};
pub use self::log_linear::{LogLinearCounts, LogLinearLayout};
pub use self::ring::TimeWindowHistogram;
pub use self::snapshot::{CountAtBucket, HistogramSnapshot, ValueAtPercentile};
pub use self::step::StepHistogram;

use crate::clock::SharedClock;

/// A histogram whose contents are bounded to a window of time.
pub trait WindowedHistogram: Send + Sync + fmt::Debug {
    /// Records a sample into the active slot.
    fn record(&self, value: f64);

    /// Merges the live slots and combines them with the given scalar statistics.
    fn snapshot(&self, count: u64, total: f64, max: f64) -> HistogramSnapshot;

    /// Bucket upper bounds, ending with `+Inf`, or empty when no buckets are published.
    fn bucket_bounds(&self) -> &[f64];

    /// Number of slots the histogram cycles through.
    fn slot_count(&self) -> usize;

    /// Performs a closing rollover where the histogram has one.
    fn close(&self) {}
}

/// Which windowing a histogram uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistogramMode {
    /// Decay samples after the configured expiry.
    Decaying,
    /// Keep bucket counts since creation, decay percentiles after the configured expiry.
    Cumulative,
    /// Report the last closed step of the given length.
    Step(Duration),
}

/// Builds the histogram `config` asks for, or `None` when it publishes neither percentiles nor
/// buckets.
pub fn new_histogram(
    config: &DistributionConfig,
    mode: HistogramMode,
    clock: SharedClock,
) -> Result<Option<Box<dyn WindowedHistogram>>, HistogramConfigError> {
    config.validate()?;
    let Some(layout) = SlotLayout::from_config(config) else {
        return Ok(None);
    };

    let histogram: Box<dyn WindowedHistogram> = match mode {
        HistogramMode::Decaying => Box::new(TimeWindowHistogram::new(
            layout,
            config.expiry(),
            config.buffer_length(),
            clock,
        )?),
        HistogramMode::Cumulative => Box::new(CumulativeHistogram::new(
            layout,
            config.expiry(),
            config.buffer_length(),
            clock,
        )?),
        HistogramMode::Step(step) => Box::new(StepHistogram::new(layout, step, clock)),
    };
    Ok(Some(histogram))
}

/// What every slot of a histogram records into, shared between the slots.
#[derive(Debug, Clone)]
pub struct SlotLayout {
    bounds: Option<Arc<[f64]>>,
    log_linear: Option<Arc<LogLinearLayout>>,
    percentiles: Arc<[f64]>,
    min: f64,
    max: f64,
    scale: f64,
}

impl SlotLayout {
    /// Derives the slot layout from `config`, or `None` when nothing needs recording.
    pub fn from_config(config: &DistributionConfig) -> Option<Self> {
        let bounds = config.histogram_buckets();
        let bounds: Option<Arc<[f64]>> = (!bounds.is_empty()).then(|| bounds.into());

        let (min, max) = (config.minimum_expected_value(), config.maximum_expected_value());
        let precision = config.percentile_precision();

        // One log-linear unit is the minimum expected value divided by 10^precision, so every
        // value in range keeps `precision` significant digits, fractional values included.
        let scale = if min > 0.0 && min.is_finite() { 10f64.powi(i32::from(precision)) / min } else { 1.0 };
        let log_linear = config.is_publishing_percentiles().then(|| {
            let highest = if max.is_finite() { (max * scale).ceil() as u64 } else { u64::MAX };
            Arc::new(LogLinearLayout::new(highest, precision))
        });

        if bounds.is_none() && log_linear.is_none() {
            return None;
        }

        Some(Self { bounds, log_linear, percentiles: config.percentiles().into(), min, max, scale })
    }

    /// The same layout without percentiles, or `None` when it publishes no buckets.
    pub(crate) fn buckets_only(&self) -> Option<Self> {
        self.bounds.as_ref()?;
        Some(Self { log_linear: None, ..self.clone() })
    }

    /// The same layout without buckets, or `None` when it publishes no percentiles.
    pub(crate) fn percentiles_only(&self) -> Option<Self> {
        self.log_linear.as_ref()?;
        Some(Self { bounds: None, ..self.clone() })
    }

    pub(crate) fn new_slot(&self) -> HistogramSlot {
        HistogramSlot {
            fixed: self.bounds.clone().and_then(FixedBoundaryCounts::new),
            log_linear: self.log_linear.clone().map(LogLinearCounts::new),
        }
    }

    pub(crate) fn bounds(&self) -> &[f64] {
        self.bounds.as_deref().unwrap_or_default()
    }

    pub(crate) fn record(&self, slot: &HistogramSlot, value: f64) {
        if value.is_nan() {
            return;
        }
        if let Some(fixed) = &slot.fixed {
            fixed.record(value);
        }
        if let Some(log_linear) = &slot.log_linear {
            let scaled = (value.clamp(self.min, self.max) * self.scale).ceil();
            log_linear.record(scaled as u64);
        }
    }

    pub(crate) fn snapshot<'a, I>(&self, slots: I, count: u64, total: f64, max: f64) -> HistogramSnapshot
    where
        I: IntoIterator<Item = &'a HistogramSlot> + Clone,
    {
        let mut snapshot = HistogramSnapshot::empty(count, total, max);

        if let Some(bounds) = &self.bounds {
            let mut counts = vec![0u64; bounds.len()];
            for slot in slots.clone() {
                if let Some(fixed) = &slot.fixed {
                    fixed.merge_into(&mut counts);
                }
            }
            snapshot.histogram_counts = bounds
                .iter()
                .zip(counts)
                .map(|(bucket, count)| CountAtBucket { bucket: *bucket, count })
                .collect();
        }

        if let Some(layout) = &self.log_linear {
            if let Some(mut merged) = layout.new_histogram() {
                for slot in slots {
                    if let Some(log_linear) = &slot.log_linear {
                        log_linear.merge_into(&mut merged);
                    }
                }
                snapshot.percentile_values = self
                    .percentiles
                    .iter()
                    .map(|p| {
                        let value = if merged.is_empty() { 0.0 } else { merged.value_at_quantile(*p) as f64 / self.scale };
                        ValueAtPercentile { percentile: *p, value }
                    })
                    .collect();
            }
        }

        snapshot
    }
}

/// One sub-histogram.
#[derive(Debug)]
pub(crate) struct HistogramSlot {
    fixed: Option<FixedBoundaryCounts>,
    log_linear: Option<LogLinearCounts>,
}

impl HistogramSlot {
    pub(crate) fn reset(&self) {
        if let Some(fixed) = &self.fixed {
            fixed.reset();
        }
        if let Some(log_linear) = &self.log_linear {
            log_linear.reset();
        }
    }
}
