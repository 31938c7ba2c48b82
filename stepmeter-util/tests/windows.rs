use std::time::Duration;

use proptest::prelude::*;
use stepmeter_util::{
    histogram::{new_histogram, HistogramMode},
    DistributionConfig, DoubleSum, MockClock, StepWindow,
};

const STEP: Duration = Duration::from_secs(60);

proptest! {
    #[test]
    fn ring_never_outgrows_its_buffer(
        ops in proptest::collection::vec((0u64..90_000, 1.0f64..1e6), 1..400),
        buffer_length in 1usize..6,
    ) {
        let (mock, clock) = MockClock::shared();
        let config = DistributionConfig::new()
            .with_percentiles([0.5, 0.99])
            .with_percentile_histogram(true)
            .with_expiry(Duration::from_secs(60))
            .with_buffer_length(buffer_length);
        let histogram = new_histogram(&config, HistogramMode::Decaying, clock)
            .unwrap()
            .unwrap();

        let mut recorded = 0u64;
        for (advance_millis, value) in ops {
            mock.add(Duration::from_millis(advance_millis));
            histogram.record(value);
            recorded += 1;

            prop_assert_eq!(histogram.slot_count(), buffer_length);
            let snapshot = histogram.snapshot(recorded, 0.0, 0.0);
            let live: u64 = snapshot.histogram_counts.iter().map(|c| c.count).sum();
            prop_assert!(live >= 1);
            prop_assert!(live <= recorded);
        }
    }

    #[test]
    fn every_recorded_amount_lands_in_exactly_one_step(
        ops in proptest::collection::vec((0u64..60_000, 0u32..1000), 1..200),
    ) {
        let (mock, clock) = MockClock::shared();
        let window = StepWindow::<DoubleSum>::new(clock, STEP);

        let mut recorded = 0.0;
        let mut observed = 0.0;
        let mut last_step = window.boundary().current_step();
        for (advance_millis, amount) in ops {
            // Advances stay under one step, so polling after each one never skips a step.
            mock.add(Duration::from_millis(advance_millis));
            let closed = window.poll();
            if window.boundary().current_step() != last_step {
                observed += closed;
                last_step = window.boundary().current_step();
            }
            window.record(f64::from(amount));
            recorded += f64::from(amount);
        }

        mock.add(STEP);
        observed += window.poll();
        prop_assert_eq!(observed, recorded);
    }
}

#[test]
fn step_histogram_reports_one_closed_step_at_a_time() {
    let (mock, clock) = MockClock::shared();
    let config = DistributionConfig::new().with_service_level_objectives([10.0, 100.0]);
    let histogram = new_histogram(&config, HistogramMode::Step(STEP), clock).unwrap().unwrap();

    for value in [5.0, 50.0, 500.0] {
        histogram.record(value);
    }
    let counts = |h: &dyn stepmeter_util::WindowedHistogram| -> Vec<u64> {
        h.snapshot(0, 0.0, 0.0).histogram_counts.iter().map(|c| c.count).collect()
    };
    assert_eq!(counts(histogram.as_ref()), vec![0, 0, 0]);

    mock.add(STEP);
    histogram.record(7.0);
    assert_eq!(counts(histogram.as_ref()), vec![1, 1, 1]);

    mock.add(STEP);
    assert_eq!(counts(histogram.as_ref()), vec![1, 0, 0]);
}
