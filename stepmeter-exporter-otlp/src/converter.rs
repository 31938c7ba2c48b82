use std::time::Duration;

use indexmap::IndexMap;
use stepmeter::{
    AggregationTemporality, Clock, Exemplar, HistogramSnapshot, Id, Meter, TimeUnit,
};

use crate::data::{
    Attributes, ExportedExemplar, HistogramDataPoint, MetricData, MetricGroup, NumberDataPoint, Shape,
    SummaryDataPoint, ValueAtQuantile,
};

const NANOS_PER_MILLI: u64 = 1_000_000;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct GroupKey {
    name: String,
    unit: String,
    description: String,
    shape: Shape,
}

/// Builds metric groups out of meters, one point per meter and shape.
///
/// Meters group by name, unit, description and shape: two meters that share a name but declare
/// different units or descriptions end up in separate metrics. Every point of a conversion shares
/// the same time range, fixed when the converter is created.
///
/// Converting reads meters without changing them, except that each point takes the exemplars it
/// exports, so they are handed off only once.
#[derive(Debug)]
pub struct MetricConverter {
    temporality: AggregationTemporality,
    base_time_unit: TimeUnit,
    now_nanos: u64,
    delta_start_nanos: u64,
    delta_end_nanos: u64,
    groups: IndexMap<GroupKey, MetricGroup>,
}

impl MetricConverter {
    /// Creates a new `MetricConverter` stamping points as of the clock's current wall time.
    ///
    /// Under delta temporality every point covers the most recently closed step, `[end - step,
    /// end)` where `end` is the current time rounded down to a step boundary.
    pub fn new(
        clock: &dyn Clock,
        step: Duration,
        temporality: AggregationTemporality,
        base_time_unit: TimeUnit,
    ) -> Self {
        let now_millis = clock.wall_time_millis().max(0) as u64;
        let step_millis = (step.as_millis() as u64).max(1);
        let delta_end_nanos = (now_millis / step_millis) * step_millis * NANOS_PER_MILLI;
        Self {
            temporality,
            base_time_unit,
            now_nanos: now_millis * NANOS_PER_MILLI,
            delta_start_nanos: delta_end_nanos.saturating_sub(step_millis * NANOS_PER_MILLI),
            delta_end_nanos,
            groups: IndexMap::new(),
        }
    }

    /// Adds every meter in `meters`.
    pub fn add_meters<'a, I>(&mut self, meters: I)
    where
        I: IntoIterator<Item = &'a Meter>,
    {
        for meter in meters {
            self.add_meter(meter);
        }
    }

    /// Adds one meter. Function-backed meters and gauges whose source is gone are skipped.
    pub fn add_meter(&mut self, meter: &Meter) {
        match meter {
            Meter::Counter(counter) => {
                let exemplars = self.exemplars(counter.drain_exemplars(), false);
                let point = self.sum_point(meter, counter.value(self.temporality), exemplars);
                self.push_sum(counter.id(), point);
            }
            Meter::FunctionCounter(counter) => {
                if counter.is_alive() {
                    let point = self.sum_point(meter, counter.value(self.temporality), Vec::new());
                    self.push_sum(counter.id(), point);
                }
            }
            Meter::Gauge(gauge) => {
                if let Some(value) = gauge.sample() {
                    let point = self.gauge_point(attributes(gauge.id()), value);
                    self.push(gauge.id(), self.plain_unit(gauge.id()), Shape::Gauge, Points::Number(point));
                }
            }
            Meter::Timer(timer) => {
                let snapshot = timer.snapshot(self.temporality);
                self.add_distribution(meter, snapshot, timer.drain_exemplars(), true);
            }
            Meter::DistributionSummary(summary) => {
                let snapshot = summary.snapshot(self.temporality);
                self.add_distribution(meter, snapshot, summary.drain_exemplars(), false);
            }
            Meter::LongTaskTimer(timer) => {
                self.add_distribution(meter, timer.snapshot(), Vec::new(), true);
            }
            Meter::FunctionTimer(timer) => {
                if timer.is_alive() {
                    let (count, total_nanos) = timer.values(self.temporality);
                    let (start_time_nanos, time_nanos) = self.interval(meter);
                    let point = HistogramDataPoint {
                        attributes: attributes(timer.id()),
                        start_time_nanos,
                        time_nanos,
                        count: count.max(0.0) as u64,
                        sum: self.base_time_unit.from_nanos(total_nanos),
                        max: None,
                        explicit_bounds: Vec::new(),
                        bucket_counts: Vec::new(),
                        exemplars: Vec::new(),
                    };
                    let unit = self.time_unit(timer.id());
                    self.push(timer.id(), unit, Shape::Histogram, Points::Histogram(point));
                }
            }
            Meter::Custom(custom) => {
                for measurement in custom.measure() {
                    if measurement.value.is_nan() {
                        continue;
                    }
                    let mut attributes = attributes(custom.id());
                    attributes.push(("statistic".to_string(), measurement.statistic.as_str().to_string()));
                    let point = self.gauge_point(attributes, measurement.value);
                    self.push(custom.id(), self.plain_unit(custom.id()), Shape::Gauge, Points::Number(point));
                }
            }
        }
    }

    /// Finishes the conversion, returning metrics in the order their first meter was added.
    pub fn into_metrics(self) -> Vec<MetricGroup> {
        self.groups.into_values().collect()
    }

    fn add_distribution(
        &mut self,
        meter: &Meter,
        snapshot: HistogramSnapshot,
        exemplars: Vec<Exemplar>,
        time_based: bool,
    ) {
        let id = meter.id();
        let unit = if time_based { self.time_unit(id) } else { self.plain_unit(id) };
        let base_time_unit = self.base_time_unit;
        let convert = |value: f64| if time_based { base_time_unit.from_nanos(value) } else { value };
        let (start_time_nanos, time_nanos) = self.interval(meter);
        let sum = convert(snapshot.total);

        if snapshot.has_percentiles() {
            let point = SummaryDataPoint {
                attributes: attributes(id),
                start_time_nanos,
                time_nanos,
                count: snapshot.count,
                sum,
                quantile_values: snapshot
                    .percentile_values
                    .iter()
                    .map(|p| ValueAtQuantile { quantile: p.percentile, value: convert(p.value) })
                    .collect(),
            };
            self.push(id, unit.clone(), Shape::Summary, Points::Summary(point));
        }

        // Without buckets the histogram still carries count and sum, unless percentiles already
        // cover the meter.
        if snapshot.has_buckets() || !snapshot.has_percentiles() {
            let explicit_bounds = snapshot
                .histogram_counts
                .iter()
                .filter(|c| c.bucket.is_finite())
                .map(|c| convert(c.bucket))
                .collect();
            let point = HistogramDataPoint {
                attributes: attributes(id),
                start_time_nanos,
                time_nanos,
                count: snapshot.count,
                sum,
                max: (self.temporality == AggregationTemporality::Delta).then(|| convert(snapshot.max)),
                explicit_bounds,
                bucket_counts: snapshot.histogram_counts.iter().map(|c| c.count).collect(),
                exemplars: self.exemplars(exemplars, time_based),
            };
            self.push(id, unit, Shape::Histogram, Points::Histogram(point));
        }
    }

    fn sum_point(&self, meter: &Meter, value: f64, exemplars: Vec<ExportedExemplar>) -> NumberDataPoint {
        let (start_time_nanos, time_nanos) = self.interval(meter);
        NumberDataPoint { attributes: attributes(meter.id()), start_time_nanos, time_nanos, value, exemplars }
    }

    fn gauge_point(&self, attributes: Attributes, value: f64) -> NumberDataPoint {
        NumberDataPoint { attributes, start_time_nanos: 0, time_nanos: self.now_nanos, value, exemplars: Vec::new() }
    }

    fn push_sum(&mut self, id: &Id, point: NumberDataPoint) {
        let unit = self.plain_unit(id);
        self.push(id, unit, Shape::Sum, Points::Number(point));
    }

    fn interval(&self, meter: &Meter) -> (u64, u64) {
        match self.temporality {
            AggregationTemporality::Delta => (self.delta_start_nanos, self.delta_end_nanos),
            AggregationTemporality::Cumulative => {
                let created = meter.created_millis().max(0) as u64 * NANOS_PER_MILLI;
                (created, self.now_nanos)
            }
        }
    }

    fn exemplars(&self, exemplars: Vec<Exemplar>, time_based: bool) -> Vec<ExportedExemplar> {
        exemplars
            .into_iter()
            .map(|e| ExportedExemplar {
                filtered_attributes: e.attributes,
                time_nanos: e.timestamp_nanos.max(0) as u64,
                value: if time_based { self.base_time_unit.from_nanos(e.value) } else { e.value },
                trace_id: e.trace_id,
                span_id: e.span_id,
            })
            .collect()
    }

    fn plain_unit(&self, id: &Id) -> String {
        id.unit().unwrap_or_default().to_string()
    }

    fn time_unit(&self, id: &Id) -> String {
        id.unit().unwrap_or(self.base_time_unit.symbol()).to_string()
    }

    fn push(&mut self, id: &Id, unit: String, shape: Shape, points: Points) {
        let key = GroupKey {
            name: id.name().to_string(),
            unit,
            description: id.description().unwrap_or_default().to_string(),
            shape,
        };
        let temporality = self.temporality;
        let group = self.groups.entry(key).or_insert_with_key(|key| MetricGroup {
            name: key.name.clone(),
            unit: key.unit.clone(),
            description: key.description.clone(),
            data: match key.shape {
                Shape::Sum => MetricData::Sum { monotonic: true, temporality, points: Vec::new() },
                Shape::Gauge => MetricData::Gauge { points: Vec::new() },
                Shape::Histogram => MetricData::Histogram { temporality, points: Vec::new() },
                Shape::Summary => MetricData::Summary { points: Vec::new() },
            },
        });

        match (&mut group.data, points) {
            (MetricData::Sum { points, .. } | MetricData::Gauge { points }, Points::Number(point)) => {
                points.push(point)
            }
            (MetricData::Histogram { points, .. }, Points::Histogram(point)) => points.push(point),
            (MetricData::Summary { points }, Points::Summary(point)) => points.push(point),
            // The shape is part of the key, so data and points always agree.
            _ => unreachable!("metric data does not match its shape"),
        }
    }
}

enum Points {
    Number(NumberDataPoint),
    Histogram(HistogramDataPoint),
    Summary(SummaryDataPoint),
}

fn attributes(id: &Id) -> Attributes {
    id.tags().iter().map(|tag| (tag.key().to_string(), tag.value().to_string())).collect()
}

/// Converts `meters` into metric groups. See [`MetricConverter`].
pub fn convert(
    meters: &[Meter],
    temporality: AggregationTemporality,
    clock: &dyn Clock,
    step: Duration,
    base_time_unit: TimeUnit,
) -> Vec<MetricGroup> {
    let mut converter = MetricConverter::new(clock, step, temporality, base_time_unit);
    converter.add_meters(meters);
    converter.into_metrics()
}

#[cfg(test)]
mod tests {
    use super::convert;
    use crate::data::{MetricData, Shape};
    use approx::assert_relative_eq;
    use std::{sync::Arc, time::Duration};
    use stepmeter::{
        AggregationTemporality, DistributionConfig, Id, MeterRegistry, MockClock, RegistryConfig, Statistic,
        TimeUnit, ValueSource,
    };

    const STEP: Duration = Duration::from_secs(60);

    fn registry(temporality: AggregationTemporality) -> (Arc<MockClock>, MeterRegistry) {
        let (mock, clock) = MockClock::shared();
        let config = RegistryConfig::new().with_step(STEP).with_temporality(temporality);
        (mock, MeterRegistry::with_clock(config, clock))
    }

    fn metrics(registry: &MeterRegistry, temporality: AggregationTemporality) -> Vec<crate::MetricGroup> {
        convert(&registry.meters(), temporality, registry.clock().as_ref(), STEP, TimeUnit::Milliseconds)
    }

    #[test]
    fn both_percentiles_and_buckets_emit_two_metrics() {
        let (_mock, registry) = registry(AggregationTemporality::Cumulative);
        let config = DistributionConfig::new()
            .with_percentiles([0.5])
            .with_service_level_objectives([1_000_000.0]);
        let timer = registry.timer(Id::named("rpc"), config).unwrap();
        timer.record(Duration::from_micros(500));

        let metrics = metrics(&registry, AggregationTemporality::Cumulative);
        assert_eq!(metrics.len(), 2);
        assert!(metrics.iter().all(|m| m.name == "rpc" && m.unit == "ms"));
        assert!(matches!(metrics[0].data, MetricData::Summary { .. }));
        match &metrics[1].data {
            MetricData::Histogram { points, .. } => {
                assert_eq!(points[0].explicit_bounds, vec![1.0]);
                assert_eq!(points[0].bucket_counts, vec![1, 0]);
                assert_eq!(points[0].max, None);
            }
            other => panic!("unexpected data {other:?}"),
        }
    }

    #[test]
    fn distributions_without_histograms_still_report_count_and_sum() {
        let (_mock, registry) = registry(AggregationTemporality::Cumulative);
        let summary = registry.summary(Id::named("payload").with_unit("By"), DistributionConfig::new()).unwrap();
        summary.record(10.0);
        summary.record(20.0);

        let metrics = metrics(&registry, AggregationTemporality::Cumulative);
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].unit, "By");
        match &metrics[0].data {
            MetricData::Histogram { points, .. } => {
                assert_eq!((points[0].count, points[0].sum), (2, 30.0));
                assert!(points[0].bucket_counts.is_empty());
            }
            other => panic!("unexpected data {other:?}"),
        }
    }

    #[test]
    fn custom_meters_become_gauges_with_a_statistic_attribute() {
        let (mock, registry) = registry(AggregationTemporality::Cumulative);
        mock.add(Duration::from_millis(1500));
        registry
            .custom(
                Id::new("queue", [("name", "jobs")]),
                vec![
                    (Statistic::Value, ValueSource::from_fn(|| 3.0)),
                    (Statistic::Max, ValueSource::from_fn(|| 9.0)),
                ],
            )
            .unwrap();

        let metrics = metrics(&registry, AggregationTemporality::Cumulative);
        assert_eq!(metrics.len(), 1);
        match &metrics[0].data {
            MetricData::Gauge { points } => {
                assert_eq!(points.len(), 2);
                assert_eq!(points[1].attributes, vec![
                    ("name".to_string(), "jobs".to_string()),
                    ("statistic".to_string(), "max".to_string()),
                ]);
                assert_eq!(points[1].value, 9.0);
                assert_eq!(points[1].time_nanos, 1_500_000_000);
            }
            other => panic!("unexpected data {other:?}"),
        }
    }

    #[test]
    fn long_task_timers_report_in_flight_tasks() {
        let (mock, registry) = registry(AggregationTemporality::Delta);
        let timer = registry.long_task_timer(Id::named("migration"), DistributionConfig::new()).unwrap();
        let task = timer.start();
        mock.add(Duration::from_secs(90));

        let metrics = metrics(&registry, AggregationTemporality::Delta);
        match &metrics[0].data {
            MetricData::Histogram { points, .. } => {
                assert_eq!(points[0].count, 1);
                assert_eq!(points[0].sum, 90_000.0);
                assert_eq!(points[0].max, Some(90_000.0));
                assert_eq!((points[0].start_time_nanos, points[0].time_nanos), (0, 60_000_000_000));
            }
            other => panic!("unexpected data {other:?}"),
        }
        task.stop();
    }

    #[test]
    fn durations_follow_the_base_time_unit() {
        let (_mock, registry) = registry(AggregationTemporality::Cumulative);
        let timer = registry.timer(Id::named("gc.pause"), DistributionConfig::new()).unwrap();
        timer.record(Duration::from_micros(1_500));
        timer.record(Duration::from_micros(250));

        let metrics = convert(
            &registry.meters(),
            AggregationTemporality::Cumulative,
            registry.clock().as_ref(),
            STEP,
            TimeUnit::Seconds,
        );
        assert_eq!(metrics[0].unit, "s");
        match &metrics[0].data {
            MetricData::Histogram { points, .. } => assert_relative_eq!(points[0].sum, 0.00175, max_relative = 1e-12),
            other => panic!("unexpected data {other:?}"),
        }
    }

    #[test]
    fn dropped_sources_are_skipped() {
        let (_mock, registry) = registry(AggregationTemporality::Cumulative);
        let state = Arc::new(7.0f64);
        registry.gauge(Id::named("temp"), ValueSource::weak(&state, |s| *s)).unwrap();
        registry.function_counter(Id::named("reads"), ValueSource::weak(&state, |s| *s)).unwrap();
        assert_eq!(metrics(&registry, AggregationTemporality::Cumulative).len(), 2);

        drop(state);
        assert!(metrics(&registry, AggregationTemporality::Cumulative).is_empty());
    }

    #[test]
    fn shape_is_part_of_the_group_key() {
        let (_mock, registry) = registry(AggregationTemporality::Cumulative);
        registry.counter(Id::new("jobs", [("state", "done")])).unwrap().increment();
        registry
            .gauge(Id::new("jobs", [("state", "queued")]), ValueSource::from_fn(|| 4.0))
            .unwrap();

        let metrics = metrics(&registry, AggregationTemporality::Cumulative);
        let mut shapes: Vec<Shape> = metrics
            .iter()
            .map(|m| match m.data {
                MetricData::Sum { .. } => Shape::Sum,
                MetricData::Gauge { .. } => Shape::Gauge,
                MetricData::Histogram { .. } => Shape::Histogram,
                MetricData::Summary { .. } => Shape::Summary,
            })
            .collect();
        shapes.sort_by_key(|s| *s as u8);
        assert_eq!(shapes, vec![Shape::Sum, Shape::Gauge]);
    }
}
