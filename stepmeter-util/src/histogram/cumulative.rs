use std::time::Duration;

use crate::clock::SharedClock;

use super::{
    HistogramConfigError, HistogramSlot, HistogramSnapshot, SlotLayout, TimeWindowHistogram, WindowedHistogram,
};

/// A histogram for cumulative export.
///
/// Bucket counts accumulate from creation, so they always add up to the cumulative count they are
/// reported with. Percentiles are computed client side over a [`TimeWindowHistogram`] and decay
/// with it.
#[derive(Debug)]
pub struct CumulativeHistogram {
    buckets: Option<(SlotLayout, HistogramSlot)>,
    percentiles: Option<TimeWindowHistogram>,
}

impl CumulativeHistogram {
    /// Creates a new `CumulativeHistogram`. `expiry` and `buffer_length` shape the percentile ring.
    pub fn new(
        layout: SlotLayout,
        expiry: Duration,
        buffer_length: usize,
        clock: SharedClock,
    ) -> Result<Self, HistogramConfigError> {
        let buckets = layout.buckets_only().map(|layout| {
            let slot = layout.new_slot();
            (layout, slot)
        });
        let percentiles = layout
            .percentiles_only()
            .map(|layout| TimeWindowHistogram::new(layout, expiry, buffer_length, clock))
            .transpose()?;
        Ok(Self { buckets, percentiles })
    }
}

impl WindowedHistogram for CumulativeHistogram {
    fn record(&self, value: f64) {
        if let Some((layout, slot)) = &self.buckets {
            layout.record(slot, value);
        }
        if let Some(percentiles) = &self.percentiles {
            percentiles.record(value);
        }
    }

    fn snapshot(&self, count: u64, total: f64, max: f64) -> HistogramSnapshot {
        let mut snapshot = match &self.percentiles {
            Some(percentiles) => percentiles.snapshot(count, total, max),
            None => HistogramSnapshot::empty(count, total, max),
        };
        if let Some((layout, slot)) = &self.buckets {
            snapshot.histogram_counts = layout.snapshot(std::iter::once(slot), count, total, max).histogram_counts;
        }
        snapshot
    }

    fn bucket_bounds(&self) -> &[f64] {
        self.buckets.as_ref().map(|(layout, _)| layout.bounds()).unwrap_or_default()
    }

    fn slot_count(&self) -> usize {
        self.percentiles.as_ref().map_or(1, |percentiles| percentiles.slot_count())
    }
}
