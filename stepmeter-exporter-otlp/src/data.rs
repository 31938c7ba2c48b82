//! Output data model, shaped after the OTLP metrics protocol.
//!
//! Timestamps are nanoseconds since the Unix epoch. Attribute lists keep the order of the meter's
//! tags, which is sorted by key.
use stepmeter::AggregationTemporality;

/// Key/value pairs attached to resources, points and exemplars.
pub type Attributes = Vec<(String, String)>;

/// One export: every metric of a registry at a point in time.
#[derive(Clone, Debug, PartialEq)]
pub struct ExportBatch {
    /// Resource attributes describing the process.
    pub resource: Attributes,
    /// Instrumentation scope name.
    pub scope_name: String,
    /// Exported metrics, in first-seen order.
    pub metrics: Vec<MetricGroup>,
}

impl ExportBatch {
    /// Total number of data points across every metric.
    pub fn point_count(&self) -> usize {
        self.metrics.iter().map(MetricGroup::point_count).sum()
    }

    /// Metrics named `name`.
    pub fn metrics_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a MetricGroup> + 'a {
        self.metrics.iter().filter(move |m| m.name == name)
    }
}

/// Meters sharing a name, unit, description and point shape.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricGroup {
    /// Metric name.
    pub name: String,
    /// Unit, empty when the meters declared none.
    pub unit: String,
    /// Description, empty when the meters declared none.
    pub description: String,
    /// Points, one per meter.
    pub data: MetricData,
}

impl MetricGroup {
    /// Number of data points.
    pub fn point_count(&self) -> usize {
        match &self.data {
            MetricData::Sum { points, .. } | MetricData::Gauge { points } => points.len(),
            MetricData::Histogram { points, .. } => points.len(),
            MetricData::Summary { points } => points.len(),
        }
    }
}

/// Data of one metric.
#[derive(Clone, Debug, PartialEq)]
pub enum MetricData {
    /// Monotonic sums: counters and function counters.
    Sum {
        /// Whether the sum only grows.
        monotonic: bool,
        /// How points relate to each other over time.
        temporality: AggregationTemporality,
        /// Points.
        points: Vec<NumberDataPoint>,
    },
    /// Instantaneous values: gauges and custom meters.
    Gauge {
        /// Points.
        points: Vec<NumberDataPoint>,
    },
    /// Explicit-bucket histograms: timers, summaries, long task timers and function timers.
    Histogram {
        /// How points relate to each other over time.
        temporality: AggregationTemporality,
        /// Points.
        points: Vec<HistogramDataPoint>,
    },
    /// Client-side percentiles.
    Summary {
        /// Points.
        points: Vec<SummaryDataPoint>,
    },
}

/// Which shape a meter's points take. Part of the grouping key, so a meter publishing both
/// percentiles and buckets shows up under two metrics of the same name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Shape {
    /// [`MetricData::Sum`].
    Sum,
    /// [`MetricData::Gauge`].
    Gauge,
    /// [`MetricData::Histogram`].
    Histogram,
    /// [`MetricData::Summary`].
    Summary,
}

/// A single scalar.
#[derive(Clone, Debug, PartialEq)]
pub struct NumberDataPoint {
    /// Tags of the meter, plus extra attributes for custom meters.
    pub attributes: Attributes,
    /// Start of the interval, or zero for gauges.
    pub start_time_nanos: u64,
    /// End of the interval, or the observation time for gauges.
    pub time_nanos: u64,
    /// Value.
    pub value: f64,
    /// Exemplars.
    pub exemplars: Vec<ExportedExemplar>,
}

/// Count, sum and bucket counts of a distribution.
#[derive(Clone, Debug, PartialEq)]
pub struct HistogramDataPoint {
    /// Tags of the meter.
    pub attributes: Attributes,
    /// Start of the interval.
    pub start_time_nanos: u64,
    /// End of the interval.
    pub time_nanos: u64,
    /// Number of recorded values.
    pub count: u64,
    /// Sum of recorded values.
    pub sum: f64,
    /// Largest value. Only set under delta temporality, where it covers the same interval as the
    /// rest of the point.
    pub max: Option<f64>,
    /// Upper bounds of every bucket but the last, which is unbounded.
    pub explicit_bounds: Vec<f64>,
    /// Per-bucket counts, one more than there are bounds. Empty when the meter publishes no
    /// buckets.
    pub bucket_counts: Vec<u64>,
    /// Exemplars.
    pub exemplars: Vec<ExportedExemplar>,
}

/// Count, sum and percentiles of a distribution.
#[derive(Clone, Debug, PartialEq)]
pub struct SummaryDataPoint {
    /// Tags of the meter.
    pub attributes: Attributes,
    /// Start of the interval.
    pub start_time_nanos: u64,
    /// End of the interval.
    pub time_nanos: u64,
    /// Number of recorded values.
    pub count: u64,
    /// Sum of recorded values.
    pub sum: f64,
    /// Percentile values.
    pub quantile_values: Vec<ValueAtQuantile>,
}

/// One percentile.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ValueAtQuantile {
    /// Quantile in `[0, 1]`.
    pub quantile: f64,
    /// Value at that quantile.
    pub value: f64,
}

/// A sampled measurement attached to a point, in the point's unit.
#[derive(Clone, Debug, PartialEq)]
pub struct ExportedExemplar {
    /// Attributes carried from the trace context.
    pub filtered_attributes: Attributes,
    /// Measurement time.
    pub time_nanos: u64,
    /// Measured value.
    pub value: f64,
    /// Trace identifier, if any.
    pub trace_id: Option<Vec<u8>>,
    /// Span identifier, if any.
    pub span_id: Option<Vec<u8>>,
}
