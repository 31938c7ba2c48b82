/// A percentile and its approximated value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ValueAtPercentile {
    /// Percentile in `[0, 1]`.
    pub percentile: f64,
    /// Approximated value, in the unit the instrument records in.
    pub value: f64,
}

/// The number of samples that landed in one bucket.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CountAtBucket {
    /// Bucket upper bound (inclusive). The last bucket is `+Inf`.
    pub bucket: f64,
    /// Samples in `(previous bound, bucket]`.
    pub count: u64,
}

/// Point-in-time view of a distribution.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HistogramSnapshot {
    /// Number of samples.
    pub count: u64,
    /// Sum of samples.
    pub total: f64,
    /// Largest sample.
    pub max: f64,
    /// Client-side percentiles, empty when none are configured.
    pub percentile_values: Vec<ValueAtPercentile>,
    /// Per-bucket counts, empty when no buckets are published.
    pub histogram_counts: Vec<CountAtBucket>,
}

impl HistogramSnapshot {
    /// A snapshot carrying only the scalar statistics.
    pub fn empty(count: u64, total: f64, max: f64) -> Self {
        Self { count, total, max, ..Default::default() }
    }

    /// Arithmetic mean, or zero with no samples.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total / self.count as f64
        }
    }

    /// Whether client-side percentiles are present.
    pub fn has_percentiles(&self) -> bool {
        !self.percentile_values.is_empty()
    }

    /// Whether bucket counts are present.
    pub fn has_buckets(&self) -> bool {
        !self.histogram_counts.is_empty()
    }
}
