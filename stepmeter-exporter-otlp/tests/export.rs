use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use stepmeter::{
    AggregationTemporality, DistributionConfig, ExemplarContext, ExemplarContextProvider, Id, MeterRegistry, MockClock, SystemClock,
};
use stepmeter_exporter_otlp::{
    data::{HistogramDataPoint, NumberDataPoint},
    BuildError, ExportBatch, ExportError, LoggingSink, MetricData, MetricGroup, MetricSink, OtlpConfig, OtlpExporter,
};

const STEP: Duration = Duration::from_secs(60);
const SECOND_NANOS: u64 = 1_000_000_000;

type Batches = Arc<Mutex<Vec<ExportBatch>>>;

fn collecting_sink() -> (Batches, impl Fn(&ExportBatch) -> Result<(), ExportError> + Send + Sync) {
    let batches = Batches::default();
    let sink = {
        let batches = Arc::clone(&batches);
        move |batch: &ExportBatch| {
            batches.lock().push(batch.clone());
            Ok(())
        }
    };
    (batches, sink)
}

fn exporter(
    temporality: AggregationTemporality,
) -> (Arc<MockClock>, OtlpExporter<impl Fn(&ExportBatch) -> Result<(), ExportError> + Send + Sync>) {
    let (mock, clock) = MockClock::shared();
    let config = OtlpConfig::new().with_step(STEP).with_temporality(temporality);
    let registry = Arc::new(MeterRegistry::with_clock(config.registry_config(None), clock));
    let (_, sink) = collecting_sink();
    (mock, OtlpExporter::new(config, registry, sink))
}

fn sum_points(metric: &MetricGroup) -> &[NumberDataPoint] {
    match &metric.data {
        MetricData::Sum { points, .. } => points,
        other => panic!("expected a sum, got {other:?}"),
    }
}

fn histogram_points(metric: &MetricGroup) -> &[HistogramDataPoint] {
    match &metric.data {
        MetricData::Histogram { points, .. } => points,
        other => panic!("expected a histogram, got {other:?}"),
    }
}

#[test]
fn meters_group_by_name_unit_and_description() {
    let (_mock, exporter) = exporter(AggregationTemporality::Cumulative);
    let registry = exporter.registry();

    let described = |result: &'static str| Id::new("http.requests", [("result", result)]).with_description("Requests");
    registry.counter(described("ok")).unwrap().increment();
    registry.counter(described("error")).unwrap().increment_by(2.0);

    registry
        .counter(Id::new("cache.gets", [("result", "hit")]).with_description("Cache lookups"))
        .unwrap()
        .increment();
    registry
        .counter(Id::new("cache.gets", [("result", "miss")]).with_description("Cache misses"))
        .unwrap()
        .increment();

    let batch = exporter.batch();
    let requests: Vec<&MetricGroup> = batch.metrics_named("http.requests").collect();
    assert_eq!(requests.len(), 1);
    assert_eq!(sum_points(requests[0]).len(), 2);

    let gets: Vec<&MetricGroup> = batch.metrics_named("cache.gets").collect();
    assert_eq!(gets.len(), 2);
    assert!(gets.iter().all(|m| sum_points(m).len() == 1));
    assert_ne!(gets[0].description, gets[1].description);
}

#[test]
fn timer_end_to_end_under_both_temporalities() {
    for temporality in [AggregationTemporality::Cumulative, AggregationTemporality::Delta] {
        let (mock, exporter) = exporter(temporality);
        let timer = exporter.registry().timer(Id::named("checkout"), DistributionConfig::new()).unwrap();
        for millis in [10, 77, 111] {
            timer.record(Duration::from_millis(millis));
        }

        let batch = exporter.batch();
        let point = &histogram_points(&batch.metrics[0])[0];
        assert_eq!(batch.metrics[0].unit, "ms");
        match temporality {
            AggregationTemporality::Cumulative => {
                assert_eq!((point.count, point.sum), (3, 198.0));
                assert_eq!(point.max, None);
            }
            AggregationTemporality::Delta => assert_eq!(point.count, 0),
        }

        if temporality == AggregationTemporality::Delta {
            mock.add(STEP);
            let batch = exporter.batch();
            let point = &histogram_points(&batch.metrics[0])[0];
            assert_eq!((point.count, point.sum, point.max), (3, 198.0, Some(111.0)));
            assert_eq!((point.start_time_nanos, point.time_nanos), (0, 60 * SECOND_NANOS));
        }
    }
}

#[test]
fn delta_intervals_are_contiguous() {
    let (mock, exporter) = exporter(AggregationTemporality::Delta);
    let counter = exporter.registry().counter(Id::named("jobs")).unwrap();

    let mut intervals = Vec::new();
    for (advance, increments) in [(60, 2), (65, 0), (55, 1)] {
        for _ in 0..increments {
            counter.increment();
        }
        mock.add(Duration::from_secs(advance));
        let batch = exporter.batch();
        let point = &sum_points(&batch.metrics[0])[0];
        intervals.push((point.start_time_nanos, point.time_nanos, point.value));
    }

    assert_eq!(
        intervals,
        vec![
            (0, 60 * SECOND_NANOS, 2.0),
            (60 * SECOND_NANOS, 120 * SECOND_NANOS, 0.0),
            (120 * SECOND_NANOS, 180 * SECOND_NANOS, 1.0),
        ]
    );
}

#[test]
fn cumulative_points_start_at_creation() {
    let (mock, exporter) = exporter(AggregationTemporality::Cumulative);
    mock.add(Duration::from_secs(5));
    exporter.registry().counter(Id::named("started")).unwrap().increment();
    mock.add(Duration::from_secs(100));

    let batch = exporter.batch();
    let point = &sum_points(&batch.metrics[0])[0];
    assert_eq!((point.start_time_nanos, point.time_nanos), (5 * SECOND_NANOS, 105 * SECOND_NANOS));
}

#[test]
fn exemplars_are_handed_off_once_in_the_point_unit() {
    let (mock, clock) = MockClock::shared();
    let config = OtlpConfig::new()
        .with_step(STEP)
        .with_temporality(AggregationTemporality::Delta)
        .with_exemplars(true);
    let provider: Arc<dyn ExemplarContextProvider> =
        Arc::new(|| Some(ExemplarContext::from_hex("4bf92f3577b34da6a3ce929d0e0e4736", "00f067aa0ba902b7")));
    let registry = Arc::new(MeterRegistry::with_clock(config.registry_config(Some(provider)), clock));
    let (_, sink) = collecting_sink();
    let exporter = OtlpExporter::new(config, Arc::clone(&registry), sink);

    let timer = registry
        .timer(Id::named("db.query"), DistributionConfig::new().with_service_level_objectives([100_000_000.0]))
        .unwrap();
    timer.record(Duration::from_millis(50));
    timer.record(Duration::from_millis(500));
    mock.add(STEP);

    let batch = exporter.batch();
    let point = &histogram_points(&batch.metrics[0])[0];
    assert_eq!(point.explicit_bounds, vec![100.0]);
    assert_eq!(point.bucket_counts, vec![1, 1]);
    let values: Vec<f64> = point.exemplars.iter().map(|e| e.value).collect();
    assert_eq!(values, vec![50.0, 500.0]);
    assert_eq!(point.exemplars[0].span_id.as_deref(), Some(&[0x00, 0xf0, 0x67, 0xaa, 0x0b, 0xa9, 0x02, 0xb7][..]));

    let again = exporter.batch();
    assert!(histogram_points(&again.metrics[0])[0].exemplars.is_empty());
}

#[test]
fn failed_exports_leave_cumulative_state_intact() {
    let (_mock, clock) = MockClock::shared();
    let config = OtlpConfig::new().with_step(STEP);
    let registry = Arc::new(MeterRegistry::with_clock(config.registry_config(None), clock));
    let failing = |_: &ExportBatch| -> Result<(), ExportError> {
        Err(ExportError::Rejected { reason: "collector unavailable".to_string() })
    };
    let exporter = OtlpExporter::new(config, Arc::clone(&registry), failing);

    registry.counter(Id::named("orders")).unwrap().increment_by(4.0);
    assert!(exporter.publish().is_err());
    assert!(exporter.publish().is_err());

    let batch = exporter.batch();
    assert_eq!(sum_points(&batch.metrics[0])[0].value, 4.0);
}

#[test]
fn shutdown_flushes_the_partial_step() {
    let config = OtlpConfig::new()
        .with_step(Duration::from_secs(3600))
        .with_temporality(AggregationTemporality::Delta)
        .with_resource_attribute("service.name", "billing");
    let registry = Arc::new(MeterRegistry::with_clock(config.registry_config(None), SystemClock::shared()));
    let (batches, sink) = collecting_sink();

    let handle = OtlpExporter::new(config, Arc::clone(&registry), sink).spawn().unwrap();
    registry.counter(Id::named("invoices")).unwrap().increment_by(5.0);
    handle.shutdown();

    assert!(registry.is_closed());
    let batches = batches.lock();
    let last = batches.last().expect("final batch");
    assert_eq!(last.resource, vec![("service.name".to_string(), "billing".to_string())]);
    let metric = last.metrics_named("invoices").next().expect("counter exported");
    assert_eq!(sum_points(metric)[0].value, 5.0);
}

#[test]
fn spawn_rejects_a_mismatched_registry() {
    let registry = Arc::new(MeterRegistry::new(stepmeter::RegistryConfig::new().with_step(STEP)));
    let config = OtlpConfig::new().with_step(Duration::from_secs(30));
    let (_, sink) = collecting_sink();

    let err = OtlpExporter::new(config, registry, sink).spawn().unwrap_err();
    assert!(matches!(err, BuildError::ConfigMismatch { setting: "step", .. }));
}

#[test]
fn logging_sink_accepts_every_shape() {
    let _ = tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).with_test_writer().try_init();

    let (_mock, exporter) = exporter(AggregationTemporality::Cumulative);
    let registry = exporter.registry();
    registry.counter(Id::named("logins")).unwrap().increment();
    registry.gauge(Id::named("sessions"), stepmeter::ValueSource::from_fn(|| 12.0)).unwrap();
    registry
        .timer(Id::named("render"), DistributionConfig::new().with_percentiles([0.95]).with_percentile_histogram(true))
        .unwrap()
        .record(Duration::from_millis(40));

    let batch = exporter.batch();
    assert_eq!(batch.metrics.len(), 4);
    assert!(LoggingSink::new().export(&batch).is_ok());
}
