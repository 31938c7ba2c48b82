use stepmeter_util::{DistributionConfig, Exemplar, HistogramSnapshot};

use super::distribution::Distribution;
use crate::{AggregationTemporality, Id, MeterContext, MeterError};

/// Distribution of arbitrary magnitudes, such as payload sizes.
#[derive(Debug)]
pub struct DistributionSummary {
    id: Id,
    created_millis: i64,
    scale: f64,
    inner: Option<Distribution>,
}

impl DistributionSummary {
    /// Creates a new `DistributionSummary`.
    ///
    /// Fails if `config` cannot back a histogram.
    pub fn new(id: Id, config: &DistributionConfig, context: &MeterContext) -> Result<Self, MeterError> {
        let distribution = Distribution::new(&id, config, context)?;
        Ok(Self { id, created_millis: context.now_millis(), scale: 1.0, inner: Some(distribution) })
    }

    /// Creates a no-op `DistributionSummary` which does nothing.
    pub fn noop(id: Id) -> Self {
        Self { id, created_millis: 0, scale: 1.0, inner: None }
    }

    /// Multiplies every recorded amount by `scale` before it is aggregated.
    #[must_use]
    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    /// Identity of this summary.
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Wall time this summary was created at, in milliseconds since the Unix epoch.
    pub fn created_millis(&self) -> i64 {
        self.created_millis
    }

    /// Whether this summary discards everything.
    pub fn is_noop(&self) -> bool {
        self.inner.is_none()
    }

    /// Records an amount. Negative and `NaN` amounts are dropped.
    pub fn record(&self, amount: f64) {
        if let Some(inner) = &self.inner {
            inner.record(amount * self.scale);
        }
    }

    /// Number of recorded amounts since creation.
    pub fn count(&self) -> u64 {
        self.inner.as_ref().map_or(0, Distribution::count)
    }

    /// Sum of recorded amounts since creation.
    pub fn total_amount(&self) -> f64 {
        self.inner.as_ref().map_or(0.0, Distribution::total)
    }

    /// Largest amount in the step in progress or the last closed one.
    pub fn max(&self) -> f64 {
        self.inner.as_ref().map_or(0.0, Distribution::max)
    }

    /// Count, total, max and histogram data.
    pub fn snapshot(&self, temporality: AggregationTemporality) -> HistogramSnapshot {
        self.inner
            .as_ref()
            .map_or_else(HistogramSnapshot::default, |inner| inner.take_snapshot(temporality))
    }

    /// Histogram bucket bounds ending with `+Inf`, or empty.
    pub fn bucket_bounds(&self) -> &[f64] {
        self.inner.as_ref().map(Distribution::bucket_bounds).unwrap_or_default()
    }

    /// Takes the exemplars of the last closed step.
    pub fn drain_exemplars(&self) -> Vec<Exemplar> {
        self.inner.as_ref().map(Distribution::drain_exemplars).unwrap_or_default()
    }

    pub(crate) fn rollover(&self) {
        if let Some(inner) = &self.inner {
            inner.rollover();
        }
    }

    pub(crate) fn close(&self) {
        if let Some(inner) = &self.inner {
            inner.close();
        }
    }
}
