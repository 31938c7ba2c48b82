use std::{fmt, sync::Arc, time::Duration};

use stepmeter_util::{
    histogram::{new_histogram, HistogramMode},
    CellSelector, Clock, DistributionConfig, ExemplarReservoir, SharedClock, WindowedHistogram,
};

use crate::{AggregationTemporality, Id, MeterError, RegistryConfig};

/// Everything a meter factory needs to build a meter: the registry's clock and settings.
#[derive(Clone)]
pub struct MeterContext {
    clock: SharedClock,
    config: RegistryConfig,
}

impl MeterContext {
    /// Creates a new `MeterContext`.
    pub fn new(clock: SharedClock, config: RegistryConfig) -> Self {
        Self { clock, config }
    }

    /// Clock meters read time from.
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Registry settings.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Step length.
    pub fn step(&self) -> Duration {
        self.config.step()
    }

    /// Wall time, in milliseconds since the Unix epoch.
    pub fn now_millis(&self) -> i64 {
        self.clock.wall_time_millis()
    }

    /// Builds the histogram `config` asks for.
    ///
    /// Under cumulative temporality bucket counts accumulate from creation, matching the
    /// cumulative count, while percentiles decay over the configured expiry. Under delta
    /// temporality it reports the last closed step, so that buckets line up with the step's count.
    pub fn histogram(
        &self,
        id: &Id,
        config: &DistributionConfig,
    ) -> Result<Option<Box<dyn WindowedHistogram>>, MeterError> {
        let mode = match self.config.temporality() {
            AggregationTemporality::Cumulative => HistogramMode::Cumulative,
            AggregationTemporality::Delta => HistogramMode::Step(self.step()),
        };
        new_histogram(config, mode, self.clock.clone())
            .map_err(|source| MeterError::Histogram { id: id.to_string(), source })
    }

    /// Builds an exemplar reservoir when exemplars are enabled.
    ///
    /// With bucket bounds the reservoir keeps one exemplar per bucket; otherwise it samples
    /// randomly over the configured number of cells.
    pub fn reservoir(&self, bounds: &[f64]) -> Option<ExemplarReservoir> {
        let provider = self.config.exemplar_provider()?.clone();
        let selector = if bounds.is_empty() {
            CellSelector::Random
        } else {
            CellSelector::Buckets(Arc::from(bounds))
        };
        Some(ExemplarReservoir::new(
            self.config.exemplar_cells(),
            selector,
            self.step(),
            provider,
            self.clock.clone(),
        ))
    }
}

impl fmt::Debug for MeterContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeterContext").field("config", &self.config).finish_non_exhaustive()
    }
}
