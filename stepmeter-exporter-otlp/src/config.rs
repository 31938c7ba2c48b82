use std::{str::FromStr, sync::Arc, time::Duration};

use indexmap::IndexMap;
use stepmeter::{
    AggregationTemporality, DistributionConfig, ExemplarContextProvider, RegistryConfig, TimeUnit,
};
use thiserror::Error;

const DEFAULT_STEP: Duration = Duration::from_secs(60);
const DEFAULT_EXEMPLAR_CELLS: usize = 16;
const DEFAULT_SCOPE_NAME: &str = "stepmeter";

const ENV_EXPORT_INTERVAL: &str = "OTEL_METRIC_EXPORT_INTERVAL";
const ENV_TEMPORALITY: &str = "OTEL_EXPORTER_OTLP_METRICS_TEMPORALITY_PREFERENCE";
const ENV_RESOURCE_ATTRIBUTES: &str = "OTEL_RESOURCE_ATTRIBUTES";
const ENV_SERVICE_NAME: &str = "OTEL_SERVICE_NAME";

/// Errors that could occur while reading exporter configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A property was supplied but could not be parsed or is out of range.
    #[error("invalid value `{value}` for `{key}`: {reason}")]
    InvalidValue {
        /// Property or environment variable name.
        key: String,
        /// Value as supplied.
        value: String,
        /// What is wrong with it.
        reason: String,
    },
}

/// Configuration of an [`OtlpExporter`](crate::OtlpExporter) and of the registry it reads.
#[derive(Clone, Debug)]
pub struct OtlpConfig {
    step: Duration,
    temporality: AggregationTemporality,
    base_time_unit: TimeUnit,
    distribution: DistributionConfig,
    exemplars: bool,
    exemplar_cells: usize,
    resource_attributes: IndexMap<String, String>,
    scope_name: String,
}

impl OtlpConfig {
    /// Creates the default configuration: one-minute steps, cumulative temporality, milliseconds,
    /// no exemplars and no resource attributes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads configuration from `prefix`-qualified properties, falling back to the standard
    /// `OTEL_*` variables, both through `lookup`.
    ///
    /// Recognized properties, each as `<prefix>.<name>`:
    ///
    /// | name | value |
    /// |---|---|
    /// | `step` | duration, such as `30s`; a bare number is milliseconds |
    /// | `aggregationTemporality` | `cumulative` or `delta` |
    /// | `baseTimeUnit` | `nanoseconds`, `microseconds`, `milliseconds` or `seconds` |
    /// | `resourceAttributes` | `key=value` pairs separated by `,` |
    /// | `percentiles` | comma-separated list in `[0, 1]` |
    /// | `percentilePrecision` | digits of precision, `0` to `5` |
    /// | `percentileHistogram` | `true` or `false` |
    /// | `serviceLevelObjectives` | comma-separated bucket boundaries |
    /// | `minimumExpectedValue`, `maximumExpectedValue` | numbers |
    /// | `histogramExpiry` | duration |
    /// | `histogramBufferLength` | positive integer |
    /// | `exemplars` | `true` or `false` |
    /// | `exemplarCells` | positive integer |
    ///
    /// A property that is present but malformed is an error naming the key and the value; it is
    /// never replaced by the default.
    ///
    /// # Errors
    ///
    /// If any supplied value cannot be parsed, or is out of range.
    pub fn from_properties<F>(prefix: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let props = Properties { prefix, lookup: &lookup };
        let mut config = Self::default();

        if let Some(step) = props.parse_or_env("step", ENV_EXPORT_INTERVAL, parse_duration)? {
            config.step = step;
        }
        if config.step.is_zero() {
            return Err(invalid(&props.key("step"), "0", "step must be positive"));
        }

        if let Some(temporality) = props.parse_or_env("aggregationTemporality", ENV_TEMPORALITY, |value| {
            AggregationTemporality::from_str(value)
        })? {
            config.temporality = temporality;
        }
        if let Some(unit) = props.parse("baseTimeUnit", |value| TimeUnit::from_str(value))? {
            config.base_time_unit = unit;
        }

        let attributes = props
            .get("resourceAttributes")
            .or_else(|| lookup(ENV_RESOURCE_ATTRIBUTES))
            .unwrap_or_default();
        config.resource_attributes = parse_resource_attributes(&attributes);
        if !config.resource_attributes.contains_key("service.name") {
            if let Some(service) = lookup(ENV_SERVICE_NAME) {
                config.resource_attributes.insert("service.name".to_string(), service);
            }
        }

        let mut distribution = DistributionConfig::new();
        if let Some(percentiles) = props.parse("percentiles", parse_list)? {
            if let Some(bad) = percentiles.iter().find(|p| !(0.0..=1.0).contains(*p)) {
                return Err(invalid(
                    &props.key("percentiles"),
                    &bad.to_string(),
                    "percentiles must be between 0 and 1",
                ));
            }
            distribution = distribution.with_percentiles(percentiles);
        }
        if let Some(digits) = props.parse("percentilePrecision", parse_precision)? {
            distribution = distribution.with_percentile_precision(digits);
        }
        if let Some(enabled) = props.parse("percentileHistogram", parse_bool)? {
            distribution = distribution.with_percentile_histogram(enabled);
        }
        if let Some(slos) = props.parse("serviceLevelObjectives", parse_list)? {
            distribution = distribution.with_service_level_objectives(slos);
        }
        let min = props.parse("minimumExpectedValue", parse_number)?;
        if let Some(min) = min {
            distribution = distribution.with_minimum_expected_value(min);
        }
        let max = props.parse("maximumExpectedValue", parse_number)?;
        if let Some(max) = max {
            distribution = distribution.with_maximum_expected_value(max);
        }
        if let (Some(min), Some(max)) = (min, max) {
            if min > max {
                return Err(invalid(
                    &props.key("minimumExpectedValue"),
                    &min.to_string(),
                    &format!("exceeds {} ({max})", props.key("maximumExpectedValue")),
                ));
            }
        }
        let expiry = props.parse("histogramExpiry", parse_duration)?;
        if let Some(expiry) = expiry {
            distribution = distribution.with_expiry(expiry);
        }
        if let Some(length) = props.parse("histogramBufferLength", parse_positive)? {
            distribution = distribution.with_buffer_length(length);
        }
        if let Some(expiry) = expiry {
            let slot = expiry.as_millis() / distribution.buffer_length() as u128;
            if slot == 0 {
                return Err(invalid(
                    &props.key("histogramExpiry"),
                    &format!("{expiry:?}"),
                    &format!("must leave at least 1ms for each of {} buffers", distribution.buffer_length()),
                ));
            }
        }
        config.distribution = distribution;

        if let Some(enabled) = props.parse("exemplars", parse_bool)? {
            config.exemplars = enabled;
        }
        if let Some(cells) = props.parse("exemplarCells", parse_positive)? {
            config.exemplar_cells = cells;
        }

        Ok(config)
    }

    /// Reads configuration from the process environment, where property `<prefix>.step` is the
    /// variable `<prefix>.step` and the `OTEL_*` fallbacks are the usual variables.
    ///
    /// # Errors
    ///
    /// See [`from_properties`](Self::from_properties).
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        Self::from_properties(prefix, |key| std::env::var(key).ok())
    }

    /// Sets the step.
    #[must_use]
    pub fn with_step(mut self, step: Duration) -> Self {
        self.step = step;
        self
    }

    /// Sets the aggregation temporality.
    #[must_use]
    pub fn with_temporality(mut self, temporality: AggregationTemporality) -> Self {
        self.temporality = temporality;
        self
    }

    /// Sets the unit durations are exported in.
    #[must_use]
    pub fn with_base_time_unit(mut self, unit: TimeUnit) -> Self {
        self.base_time_unit = unit;
        self
    }

    /// Sets the distribution defaults handed to the registry.
    #[must_use]
    pub fn with_distribution_defaults(mut self, distribution: DistributionConfig) -> Self {
        self.distribution = distribution;
        self
    }

    /// Enables or disables exemplar sampling.
    #[must_use]
    pub fn with_exemplars(mut self, enabled: bool) -> Self {
        self.exemplars = enabled;
        self
    }

    /// Sets the number of exemplar cells per meter.
    #[must_use]
    pub fn with_exemplar_cells(mut self, cells: usize) -> Self {
        self.exemplar_cells = cells.max(1);
        self
    }

    /// Adds a resource attribute, replacing any existing value for `key`.
    #[must_use]
    pub fn with_resource_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.resource_attributes.insert(key.into(), value.into());
        self
    }

    /// Sets the instrumentation scope name stamped on every batch.
    #[must_use]
    pub fn with_scope_name(mut self, name: impl Into<String>) -> Self {
        self.scope_name = name.into();
        self
    }

    /// Step length.
    pub fn step(&self) -> Duration {
        self.step
    }

    /// Aggregation temporality.
    pub fn temporality(&self) -> AggregationTemporality {
        self.temporality
    }

    /// Unit durations are exported in.
    pub fn base_time_unit(&self) -> TimeUnit {
        self.base_time_unit
    }

    /// Distribution defaults.
    pub fn distribution_defaults(&self) -> &DistributionConfig {
        &self.distribution
    }

    /// Whether exemplar sampling is enabled.
    pub fn exemplars_enabled(&self) -> bool {
        self.exemplars
    }

    /// Exemplar cells per meter.
    pub fn exemplar_cells(&self) -> usize {
        self.exemplar_cells
    }

    /// Resource attributes, in the order they were given.
    pub fn resource_attributes(&self) -> &IndexMap<String, String> {
        &self.resource_attributes
    }

    /// Instrumentation scope name.
    pub fn scope_name(&self) -> &str {
        &self.scope_name
    }

    /// Registry configuration matching this exporter.
    ///
    /// `provider` supplies trace context for exemplars; it is only attached when exemplars are
    /// enabled.
    pub fn registry_config(&self, provider: Option<Arc<dyn ExemplarContextProvider>>) -> RegistryConfig {
        let config = RegistryConfig::new()
            .with_step(self.step)
            .with_temporality(self.temporality)
            .with_base_time_unit(self.base_time_unit)
            .with_distribution_defaults(self.distribution.clone())
            .with_exemplar_cells(self.exemplar_cells);
        match provider {
            Some(provider) if self.exemplars => config.with_exemplars(provider),
            _ => config,
        }
    }
}

impl Default for OtlpConfig {
    fn default() -> Self {
        Self {
            step: DEFAULT_STEP,
            temporality: AggregationTemporality::default(),
            base_time_unit: TimeUnit::default(),
            distribution: DistributionConfig::new(),
            exemplars: false,
            exemplar_cells: DEFAULT_EXEMPLAR_CELLS,
            resource_attributes: IndexMap::new(),
            scope_name: DEFAULT_SCOPE_NAME.to_string(),
        }
    }
}

struct Properties<'a, F> {
    prefix: &'a str,
    lookup: &'a F,
}

impl<F> Properties<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn key(&self, name: &str) -> String {
        format!("{}.{}", self.prefix, name)
    }

    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(&self.key(name))
    }

    fn parse<T, P>(&self, name: &str, parser: P) -> Result<Option<T>, ConfigError>
    where
        P: Fn(&str) -> Result<T, String>,
    {
        let key = self.key(name);
        parse_with(&key, (self.lookup)(&key), parser)
    }

    fn parse_or_env<T, P>(&self, name: &str, env: &str, parser: P) -> Result<Option<T>, ConfigError>
    where
        P: Fn(&str) -> Result<T, String>,
    {
        match self.parse(name, &parser)? {
            Some(value) => Ok(Some(value)),
            None => parse_with(env, (self.lookup)(env), parser),
        }
    }
}

fn parse_with<T, P>(key: &str, value: Option<String>, parser: P) -> Result<Option<T>, ConfigError>
where
    P: Fn(&str) -> Result<T, String>,
{
    value.map(|value| parser(value.trim()).map_err(|reason| invalid(key, &value, &reason))).transpose()
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue { key: key.to_string(), value: value.to_string(), reason: reason.to_string() }
}

/// Parses a duration such as `10s`, `250ms` or `1h`. A number without a suffix is milliseconds.
pub(crate) fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    let split = value.find(|c: char| !c.is_ascii_digit()).unwrap_or(value.len());
    let (amount, suffix) = value.split_at(split);
    let amount: u64 = amount.parse().map_err(|_| "expected a whole number followed by a unit".to_string())?;

    let duration = match suffix.trim().to_ascii_lowercase().as_str() {
        "ns" => Duration::from_nanos(amount),
        "us" => Duration::from_micros(amount),
        "" | "ms" => Duration::from_millis(amount),
        "s" => Duration::from_secs(amount),
        "m" => Duration::from_secs(amount.saturating_mul(60)),
        "h" => Duration::from_secs(amount.saturating_mul(3600)),
        "d" => Duration::from_secs(amount.saturating_mul(86_400)),
        other => return Err(format!("unknown duration unit `{other}`")),
    };
    Ok(duration)
}

/// Splits `key=value` pairs on `,`, and each pair on its first `=`. Pairs without a key or too
/// short to hold one are dropped. A repeated key keeps its last value.
pub(crate) fn parse_resource_attributes(value: &str) -> IndexMap<String, String> {
    value
        .trim()
        .split(',')
        .map(str::trim)
        .filter(|pair| pair.len() > 2 && pair.find('=').is_some_and(|index| index > 0))
        .filter_map(|pair| pair.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}

fn parse_precision(value: &str) -> Result<u8, String> {
    match value.parse::<u8>() {
        Ok(digits) if digits <= 5 => Ok(digits),
        _ => Err("expected digits of precision between 0 and 5".to_string()),
    }
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err("expected `true` or `false`".to_string()),
    }
}

fn parse_number(value: &str) -> Result<f64, String> {
    let number: f64 = value.parse().map_err(|_| "expected a number".to_string())?;
    if number.is_nan() {
        return Err("expected a number".to_string());
    }
    Ok(number)
}

fn parse_positive(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) | Err(_) => Err("expected a positive whole number".to_string()),
        Ok(n) => Ok(n),
    }
}

fn parse_list(value: &str) -> Result<Vec<f64>, String> {
    value.split(',').map(str::trim).filter(|item| !item.is_empty()).map(parse_number).collect()
}
