use std::time::Duration;

use thiserror::Error;

use super::buckets::percentile_buckets;

const DEFAULT_PERCENTILE_PRECISION: u8 = 1;
const DEFAULT_MINIMUM_EXPECTED_VALUE: f64 = 1.0;
const DEFAULT_MAXIMUM_EXPECTED_VALUE: f64 = f64::INFINITY;
const DEFAULT_EXPIRY: Duration = Duration::from_secs(120);
const DEFAULT_BUFFER_LENGTH: usize = 3;
const MAX_PERCENTILE_PRECISION: u8 = 5;

/// Errors that could occur while validating a [`DistributionConfig`].
#[derive(Debug, Error, PartialEq)]
pub enum HistogramConfigError {
    /// The ring must hold at least one sub-histogram.
    #[error("histogram buffer length must be at least 1")]
    ZeroBufferLength,

    /// Splitting the expiry over the ring leaves sub-intervals shorter than a millisecond.
    #[error("histogram expiry of {expiry:?} split over {buffer_length} buffers leaves empty rotation intervals")]
    EmptyRotationInterval {
        /// Configured expiry.
        expiry: Duration,
        /// Configured buffer length.
        buffer_length: usize,
    },

    /// More digits of precision than the log-linear histogram supports.
    #[error("percentile precision {0} is out of range (0..=5)")]
    PrecisionOutOfRange(u8),

    /// The expected value range is empty.
    #[error("minimum expected value {min} exceeds maximum expected value {max}")]
    InvertedRange {
        /// Configured minimum.
        min: f64,
        /// Configured maximum.
        max: f64,
    },

    /// A requested percentile is not a fraction.
    #[error("percentile {0} is outside of [0, 1]")]
    InvalidPercentile(f64),
}

/// Distribution statistics configuration.
///
/// Every field is optional: an unset field falls back to whatever a lower-priority configuration
/// says when merged with [`merge`](DistributionConfig::merge), and to the built-in default when read.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DistributionConfig {
    percentiles: Option<Vec<f64>>,
    percentile_precision: Option<u8>,
    percentile_histogram: Option<bool>,
    service_level_objectives: Option<Vec<f64>>,
    minimum_expected_value: Option<f64>,
    maximum_expected_value: Option<f64>,
    expiry: Option<Duration>,
    buffer_length: Option<usize>,
}

impl DistributionConfig {
    /// Creates an empty `DistributionConfig` with nothing set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Percentiles to compute client-side, each in `[0, 1]`.
    #[must_use]
    pub fn with_percentiles<I>(mut self, percentiles: I) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        self.percentiles = Some(percentiles.into_iter().collect());
        self
    }

    /// Digits of precision kept by the percentile histogram.
    #[must_use]
    pub fn with_percentile_precision(mut self, digits: u8) -> Self {
        self.percentile_precision = Some(digits);
        self
    }

    /// Whether to publish the default bucket ladder so a backend can aggregate percentiles.
    #[must_use]
    pub fn with_percentile_histogram(mut self, enabled: bool) -> Self {
        self.percentile_histogram = Some(enabled);
        self
    }

    /// Explicit bucket boundaries.
    #[must_use]
    pub fn with_service_level_objectives<I>(mut self, boundaries: I) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        self.service_level_objectives = Some(boundaries.into_iter().collect());
        self
    }

    /// Lower clamp for recorded values and lower edge of the bucket ladder.
    #[must_use]
    pub fn with_minimum_expected_value(mut self, value: f64) -> Self {
        self.minimum_expected_value = Some(value);
        self
    }

    /// Upper clamp for recorded values and upper edge of the bucket ladder.
    #[must_use]
    pub fn with_maximum_expected_value(mut self, value: f64) -> Self {
        self.maximum_expected_value = Some(value);
        self
    }

    /// How long a recorded value stays in the decaying histogram.
    #[must_use]
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry = Some(expiry);
        self
    }

    /// Number of sub-histograms the expiry is split across.
    #[must_use]
    pub fn with_buffer_length(mut self, buffer_length: usize) -> Self {
        self.buffer_length = Some(buffer_length);
        self
    }

    /// Fills every unset field of `self` from `parent`.
    #[must_use]
    pub fn merge(self, parent: &DistributionConfig) -> Self {
        Self {
            percentiles: self.percentiles.or_else(|| parent.percentiles.clone()),
            percentile_precision: self.percentile_precision.or(parent.percentile_precision),
            percentile_histogram: self.percentile_histogram.or(parent.percentile_histogram),
            service_level_objectives: self
                .service_level_objectives
                .or_else(|| parent.service_level_objectives.clone()),
            minimum_expected_value: self.minimum_expected_value.or(parent.minimum_expected_value),
            maximum_expected_value: self.maximum_expected_value.or(parent.maximum_expected_value),
            expiry: self.expiry.or(parent.expiry),
            buffer_length: self.buffer_length.or(parent.buffer_length),
        }
    }

    /// Configured percentiles.
    pub fn percentiles(&self) -> &[f64] {
        self.percentiles.as_deref().unwrap_or_default()
    }

    /// Configured digits of precision.
    pub fn percentile_precision(&self) -> u8 {
        self.percentile_precision.unwrap_or(DEFAULT_PERCENTILE_PRECISION)
    }

    /// Whether the default bucket ladder is published.
    pub fn is_percentile_histogram(&self) -> bool {
        self.percentile_histogram.unwrap_or(false)
    }

    /// Configured explicit bucket boundaries.
    pub fn service_level_objectives(&self) -> &[f64] {
        self.service_level_objectives.as_deref().unwrap_or_default()
    }

    /// Lower clamp for recorded values.
    pub fn minimum_expected_value(&self) -> f64 {
        self.minimum_expected_value.unwrap_or(DEFAULT_MINIMUM_EXPECTED_VALUE)
    }

    /// Upper clamp for recorded values.
    pub fn maximum_expected_value(&self) -> f64 {
        self.maximum_expected_value.unwrap_or(DEFAULT_MAXIMUM_EXPECTED_VALUE)
    }

    /// Decay period.
    pub fn expiry(&self) -> Duration {
        self.expiry.unwrap_or(DEFAULT_EXPIRY)
    }

    /// Ring length.
    pub fn buffer_length(&self) -> usize {
        self.buffer_length.unwrap_or(DEFAULT_BUFFER_LENGTH)
    }

    /// Whether client-side percentiles are computed.
    pub fn is_publishing_percentiles(&self) -> bool {
        !self.percentiles().is_empty()
    }

    /// Whether fixed bucket counts are published.
    pub fn is_publishing_histogram(&self) -> bool {
        self.is_percentile_histogram() || !self.service_level_objectives().is_empty()
    }

    /// Bucket boundaries for the fixed-boundary histogram, ascending, ending with `+Inf`.
    ///
    /// Empty when no buckets are published.
    pub fn histogram_buckets(&self) -> Vec<f64> {
        if !self.is_publishing_histogram() {
            return Vec::new();
        }

        let mut buckets = Vec::new();
        if self.is_percentile_histogram() {
            buckets.extend(
                percentile_buckets(self.minimum_expected_value(), self.maximum_expected_value())
                    .iter()
                    .copied(),
            );
        }
        buckets.extend(self.service_level_objectives().iter().copied().filter(|b| b.is_finite()));
        buckets.sort_by(f64::total_cmp);
        buckets.dedup();
        buckets.push(f64::INFINITY);
        buckets
    }

    /// Checks that a histogram can be built from this configuration.
    pub fn validate(&self) -> Result<(), HistogramConfigError> {
        let buffer_length = self.buffer_length();
        if buffer_length == 0 {
            return Err(HistogramConfigError::ZeroBufferLength);
        }

        let expiry = self.expiry();
        if expiry.as_millis() / (buffer_length as u128) == 0 {
            return Err(HistogramConfigError::EmptyRotationInterval { expiry, buffer_length });
        }

        let precision = self.percentile_precision();
        if precision > MAX_PERCENTILE_PRECISION {
            return Err(HistogramConfigError::PrecisionOutOfRange(precision));
        }

        let (min, max) = (self.minimum_expected_value(), self.maximum_expected_value());
        if min.is_nan() || max.is_nan() || min > max {
            return Err(HistogramConfigError::InvertedRange { min, max });
        }

        if let Some(p) = self.percentiles().iter().find(|p| !(0.0..=1.0).contains(*p)) {
            return Err(HistogramConfigError::InvalidPercentile(*p));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{DistributionConfig, HistogramConfigError};
    use std::time::Duration;

    #[test]
    fn explicit_values_win_on_merge() {
        let defaults = DistributionConfig::new()
            .with_percentiles([0.5])
            .with_expiry(Duration::from_secs(60))
            .with_buffer_length(2);
        let config = DistributionConfig::new().with_percentiles([0.99]).merge(&defaults);

        assert_eq!(config.percentiles(), &[0.99]);
        assert_eq!(config.expiry(), Duration::from_secs(60));
        assert_eq!(config.buffer_length(), 2);
        assert_eq!(config.percentile_precision(), 1);
    }

    #[test]
    fn buckets_merge_slos_and_end_with_infinity() {
        let config = DistributionConfig::new().with_service_level_objectives([100.0, 10.0, 100.0]);
        assert_eq!(config.histogram_buckets(), vec![10.0, 100.0, f64::INFINITY]);

        let config = DistributionConfig::new();
        assert!(config.histogram_buckets().is_empty());

        let config = DistributionConfig::new()
            .with_percentile_histogram(true)
            .with_minimum_expected_value(1.0)
            .with_maximum_expected_value(20.0);
        assert_eq!(
            config.histogram_buckets(),
            vec![
                1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0, 13.0, 14.0, 16.0,
                f64::INFINITY
            ]
        );
    }

    #[test]
    fn validation_rejects_unusable_rings() {
        let config = DistributionConfig::new().with_buffer_length(0);
        assert_eq!(config.validate(), Err(HistogramConfigError::ZeroBufferLength));

        let config =
            DistributionConfig::new().with_expiry(Duration::from_millis(2)).with_buffer_length(3);
        assert!(matches!(
            config.validate(),
            Err(HistogramConfigError::EmptyRotationInterval { buffer_length: 3, .. })
        ));

        let config = DistributionConfig::new().with_percentile_precision(6);
        assert_eq!(config.validate(), Err(HistogramConfigError::PrecisionOutOfRange(6)));

        let config = DistributionConfig::new().with_percentiles([1.5]);
        assert_eq!(config.validate(), Err(HistogramConfigError::InvalidPercentile(1.5)));

        assert!(DistributionConfig::new().validate().is_ok());
    }
}
