use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use stepmeter_util::{histogram::DistributionConfig, ExemplarContextProvider};

const DEFAULT_STEP: Duration = Duration::from_secs(60);
const DEFAULT_EXEMPLAR_CELLS: usize = 16;

/// How exported values relate to time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AggregationTemporality {
    /// Totals accrued since the meter was created.
    #[default]
    Cumulative,
    /// Amounts accrued within the most recently closed step.
    Delta,
}

impl AggregationTemporality {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationTemporality::Cumulative => "cumulative",
            AggregationTemporality::Delta => "delta",
        }
    }
}

impl FromStr for AggregationTemporality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cumulative" => Ok(AggregationTemporality::Cumulative),
            "delta" => Ok(AggregationTemporality::Delta),
            other => Err(format!("unknown aggregation temporality `{other}`, expected `cumulative` or `delta`")),
        }
    }
}

impl fmt::Display for AggregationTemporality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit that durations are reported in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    /// Nanoseconds.
    Nanoseconds,
    /// Microseconds.
    Microseconds,
    /// Milliseconds.
    #[default]
    Milliseconds,
    /// Seconds.
    Seconds,
}

impl TimeUnit {
    fn nanos_per_unit(&self) -> f64 {
        match self {
            TimeUnit::Nanoseconds => 1.0,
            TimeUnit::Microseconds => 1e3,
            TimeUnit::Milliseconds => 1e6,
            TimeUnit::Seconds => 1e9,
        }
    }

    /// Converts nanoseconds into this unit.
    pub fn from_nanos(&self, nanos: f64) -> f64 {
        nanos / self.nanos_per_unit()
    }

    /// Converts an amount of this unit into nanoseconds.
    pub fn to_nanos(&self, amount: f64) -> f64 {
        amount * self.nanos_per_unit()
    }

    /// Unit symbol as used in exported metadata.
    pub fn symbol(&self) -> &'static str {
        match self {
            TimeUnit::Nanoseconds => "ns",
            TimeUnit::Microseconds => "us",
            TimeUnit::Milliseconds => "ms",
            TimeUnit::Seconds => "s",
        }
    }
}

impl FromStr for TimeUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ns" | "nanoseconds" => Ok(TimeUnit::Nanoseconds),
            "us" | "microseconds" => Ok(TimeUnit::Microseconds),
            "ms" | "milliseconds" => Ok(TimeUnit::Milliseconds),
            "s" | "seconds" => Ok(TimeUnit::Seconds),
            other => Err(format!("unknown time unit `{other}`")),
        }
    }
}

/// Registry-wide settings every meter is built with.
#[derive(Clone)]
pub struct RegistryConfig {
    step: Duration,
    temporality: AggregationTemporality,
    base_time_unit: TimeUnit,
    distribution: DistributionConfig,
    exemplar_cells: usize,
    exemplar_provider: Option<Arc<dyn ExemplarContextProvider>>,
}

impl RegistryConfig {
    /// Creates a `RegistryConfig` with a one minute step, cumulative temporality, millisecond
    /// durations and exemplars disabled.
    pub fn new() -> Self {
        Self {
            step: DEFAULT_STEP,
            temporality: AggregationTemporality::default(),
            base_time_unit: TimeUnit::default(),
            distribution: DistributionConfig::new(),
            exemplar_cells: DEFAULT_EXEMPLAR_CELLS,
            exemplar_provider: None,
        }
    }

    /// Sets the step length.
    ///
    /// Defaults to one minute.
    #[must_use]
    pub fn with_step(mut self, step: Duration) -> Self {
        self.step = step;
        self
    }

    /// Sets the temporality meters are built for. Delta temporality swaps decaying histograms
    /// for step histograms.
    ///
    /// Defaults to cumulative.
    #[must_use]
    pub fn with_temporality(mut self, temporality: AggregationTemporality) -> Self {
        self.temporality = temporality;
        self
    }

    /// Sets the unit durations are reported in.
    ///
    /// Defaults to milliseconds.
    #[must_use]
    pub fn with_base_time_unit(mut self, unit: TimeUnit) -> Self {
        self.base_time_unit = unit;
        self
    }

    /// Sets the lowest-priority distribution configuration, consulted after the meter's own
    /// configuration and every filter.
    #[must_use]
    pub fn with_distribution_defaults(mut self, defaults: DistributionConfig) -> Self {
        self.distribution = defaults;
        self
    }

    /// Enables exemplar sampling, taking trace context from `provider`.
    #[must_use]
    pub fn with_exemplars(mut self, provider: Arc<dyn ExemplarContextProvider>) -> Self {
        self.exemplar_provider = Some(provider);
        self
    }

    /// Sets how many exemplar cells each meter keeps per step.
    ///
    /// Defaults to 16.
    #[must_use]
    pub fn with_exemplar_cells(mut self, cells: usize) -> Self {
        self.exemplar_cells = cells.max(1);
        self
    }

    /// Step length.
    pub fn step(&self) -> Duration {
        self.step
    }

    /// Temporality.
    pub fn temporality(&self) -> AggregationTemporality {
        self.temporality
    }

    /// Unit durations are reported in.
    pub fn base_time_unit(&self) -> TimeUnit {
        self.base_time_unit
    }

    /// Lowest-priority distribution configuration.
    pub fn distribution_defaults(&self) -> &DistributionConfig {
        &self.distribution
    }

    /// Exemplar cells per meter.
    pub fn exemplar_cells(&self) -> usize {
        self.exemplar_cells
    }

    /// Exemplar context provider, when sampling is enabled.
    pub fn exemplar_provider(&self) -> Option<&Arc<dyn ExemplarContextProvider>> {
        self.exemplar_provider.as_ref()
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RegistryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryConfig")
            .field("step", &self.step)
            .field("temporality", &self.temporality)
            .field("base_time_unit", &self.base_time_unit)
            .field("distribution", &self.distribution)
            .field("exemplar_cells", &self.exemplar_cells)
            .field("exemplars", &self.exemplar_provider.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{AggregationTemporality, TimeUnit};

    #[test]
    fn parses_temporality_case_insensitively() {
        assert_eq!("DELTA".parse(), Ok(AggregationTemporality::Delta));
        assert_eq!(" cumulative ".parse(), Ok(AggregationTemporality::Cumulative));
        assert!("gauge".parse::<AggregationTemporality>().is_err());
    }

    #[test]
    fn converts_time_units() {
        assert_eq!(TimeUnit::Milliseconds.from_nanos(198_000_000.0), 198.0);
        assert_eq!(TimeUnit::Seconds.to_nanos(1.5), 1.5e9);
        assert_eq!("us".parse::<TimeUnit>().map(|u| u.symbol()), Ok("us"));
    }
}
