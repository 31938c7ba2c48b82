//! Fixed-boundary bucket counts.
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// Atomic per-bucket counts over a fixed, ascending set of upper bounds.
///
/// Each sample lands in exactly one bucket: the first whose bound is greater than or equal to the
/// sample. Counts are kept per bucket rather than cumulatively, which is what OTLP explicit-bucket
/// histograms expect; [`cumulative`] converts when a consumer wants "less than or equal" counts.
#[derive(Debug)]
pub struct FixedBoundaryCounts {
    bounds: Arc<[f64]>,
    counts: Box<[AtomicU64]>,
}

impl FixedBoundaryCounts {
    /// Creates a new `FixedBoundaryCounts`.
    ///
    /// If `bounds` is empty, returns `None`.
    pub fn new(bounds: Arc<[f64]>) -> Option<Self> {
        if bounds.is_empty() {
            return None;
        }

        let counts = bounds.iter().map(|_| AtomicU64::new(0)).collect();
        Some(Self { bounds, counts })
    }

    /// Bucket upper bounds.
    pub fn bounds(&self) -> &[f64] {
        &self.bounds
    }

    /// Records a single sample.
    ///
    /// Samples above the last bound are dropped, so callers end the bounds with `+Inf`.
    pub fn record(&self, sample: f64) {
        let idx = self.bounds.partition_point(|bound| *bound < sample);
        if let Some(count) = self.counts.get(idx) {
            count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Adds this slot's counts into `out`, which must be as long as the bounds.
    pub fn merge_into(&self, out: &mut [u64]) {
        for (total, count) in out.iter_mut().zip(self.counts.iter()) {
            *total += count.load(Ordering::Relaxed);
        }
    }

    /// Zeroes every bucket.
    pub fn reset(&self) {
        for count in self.counts.iter() {
            count.store(0, Ordering::Relaxed);
        }
    }
}

/// Turns per-bucket counts into "less than or equal" counts.
pub fn cumulative(counts: &[u64]) -> Vec<u64> {
    counts
        .iter()
        .scan(0u64, |running, count| {
            *running += count;
            Some(*running)
        })
        .collect()
}
