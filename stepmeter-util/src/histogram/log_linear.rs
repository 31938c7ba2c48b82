//! Atomic log-linear counts for percentile approximation.
//!
//! The counts array uses the same layout as an HDR histogram with a lowest discernible value of
//! one, so a slot can be replayed into an [`hdrhistogram::Histogram`] bucket for bucket when a
//! snapshot needs percentiles. Recording is a single relaxed `fetch_add`.
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use hdrhistogram::Histogram;

// Values at or above this are clamped; keeps the highest trackable value inside HDR's limits.
const HIGHEST_TRACKABLE_CAP: u64 = 1 << 62;

/// Shape of a log-linear counts array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLinearLayout {
    digits: u8,
    highest: u64,
    sub_bucket_half_count_magnitude: u32,
    sub_bucket_half_count: usize,
    sub_bucket_mask: u64,
    counts_len: usize,
}

impl LogLinearLayout {
    /// Creates a layout tracking `[1, highest]` with `digits` significant decimal digits.
    ///
    /// `digits` is clamped to `0..=5`, `highest` to `[2, 2^62]`.
    pub fn new(highest: u64, digits: u8) -> Self {
        let digits = digits.min(5);
        let highest = highest.clamp(2, HIGHEST_TRACKABLE_CAP);

        let largest_single_unit = 2 * 10u64.pow(u32::from(digits));
        let sub_bucket_count_magnitude = 64 - (largest_single_unit - 1).leading_zeros();
        let sub_bucket_half_count_magnitude = sub_bucket_count_magnitude.max(1) - 1;
        let sub_bucket_count = 1u64 << (sub_bucket_half_count_magnitude + 1);
        let sub_bucket_half_count = (sub_bucket_count / 2) as usize;

        let mut smallest_untrackable = sub_bucket_count;
        let mut buckets_needed = 1;
        while smallest_untrackable <= highest {
            smallest_untrackable <<= 1;
            buckets_needed += 1;
        }

        Self {
            digits,
            highest,
            sub_bucket_half_count_magnitude,
            sub_bucket_half_count,
            sub_bucket_mask: sub_bucket_count - 1,
            counts_len: (buckets_needed + 1) * sub_bucket_half_count,
        }
    }

    /// Significant decimal digits.
    pub fn digits(&self) -> u8 {
        self.digits
    }

    /// Highest trackable value.
    pub fn highest(&self) -> u64 {
        self.highest
    }

    /// Number of counters in a slot.
    pub fn len(&self) -> usize {
        self.counts_len
    }

    /// Whether the layout has no counters. Never true for a constructed layout.
    pub fn is_empty(&self) -> bool {
        self.counts_len == 0
    }

    fn index_of(&self, value: u64) -> usize {
        let value = value.clamp(1, self.highest);
        let pow2ceiling = 64 - (value | self.sub_bucket_mask).leading_zeros();
        let bucket_index = pow2ceiling - (self.sub_bucket_half_count_magnitude + 1);
        let sub_bucket_index = (value >> bucket_index) as usize;
        ((bucket_index as usize + 1) << self.sub_bucket_half_count_magnitude) + sub_bucket_index
            - self.sub_bucket_half_count
    }

    fn value_at(&self, index: usize) -> u64 {
        let mut bucket_index = (index >> self.sub_bucket_half_count_magnitude) as i64 - 1;
        let mut sub_bucket_index = (index & (self.sub_bucket_half_count - 1)) + self.sub_bucket_half_count;
        if bucket_index < 0 {
            sub_bucket_index -= self.sub_bucket_half_count;
            bucket_index = 0;
        }
        (sub_bucket_index as u64) << bucket_index
    }

    /// An empty HDR histogram with the same layout.
    pub fn new_histogram(&self) -> Option<Histogram<u64>> {
        Histogram::new_with_bounds(1, self.highest, self.digits).ok()
    }
}

/// Atomic counts laid out by a [`LogLinearLayout`].
#[derive(Debug)]
pub struct LogLinearCounts {
    layout: Arc<LogLinearLayout>,
    counts: Box<[AtomicU64]>,
}

impl LogLinearCounts {
    /// Creates zeroed counts for `layout`.
    pub fn new(layout: Arc<LogLinearLayout>) -> Self {
        let counts = (0..layout.len()).map(|_| AtomicU64::new(0)).collect();
        Self { layout, counts }
    }

    /// Records `value`, clamped to the trackable range.
    pub fn record(&self, value: u64) {
        let idx = self.layout.index_of(value);
        if let Some(count) = self.counts.get(idx) {
            count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Replays these counts into `histogram`, which must share the layout.
    pub fn merge_into(&self, histogram: &mut Histogram<u64>) {
        for (idx, count) in self.counts.iter().enumerate() {
            let n = count.load(Ordering::Relaxed);
            if n > 0 {
                // Same layout, so the lowest equivalent value always fits.
                let _ = histogram.record_n(self.layout.value_at(idx), n);
            }
        }
    }

    /// Zeroes every counter.
    pub fn reset(&self) {
        for count in self.counts.iter() {
            count.store(0, Ordering::Relaxed);
        }
    }
}
