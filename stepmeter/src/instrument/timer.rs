use std::time::Duration;

use stepmeter_util::{Clock, DistributionConfig, Exemplar, HistogramSnapshot, SharedClock};

use super::distribution::Distribution;
use crate::{AggregationTemporality, Id, MeterContext, MeterError, TimeUnit};

/// Durations of short events.
///
/// Everything is recorded in nanoseconds. Histogram bounds, percentile values and exemplar values
/// come out in nanoseconds too; [`TimeUnit`] converts on the way out.
#[derive(Debug)]
pub struct Timer {
    id: Id,
    created_millis: i64,
    inner: Option<TimerState>,
}

#[derive(Debug)]
struct TimerState {
    clock: SharedClock,
    distribution: Distribution,
}

impl Timer {
    /// Creates a new `Timer`. `config` is taken as is, expected values in nanoseconds.
    ///
    /// Fails if `config` cannot back a histogram.
    pub fn new(id: Id, config: &DistributionConfig, context: &MeterContext) -> Result<Self, MeterError> {
        let distribution = Distribution::new(&id, config, context)?;
        Ok(Self {
            id,
            created_millis: context.now_millis(),
            inner: Some(TimerState { clock: context.clock().clone(), distribution }),
        })
    }

    /// Default expected range of a timer: one millisecond to thirty seconds, in nanoseconds.
    pub fn default_config() -> DistributionConfig {
        DistributionConfig::new()
            .with_minimum_expected_value(1_000_000.0)
            .with_maximum_expected_value(30_000_000_000.0)
    }

    /// Creates a no-op `Timer` which does nothing.
    pub fn noop(id: Id) -> Self {
        Self { id, created_millis: 0, inner: None }
    }

    /// Identity of this timer.
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Wall time this timer was created at, in milliseconds since the Unix epoch.
    pub fn created_millis(&self) -> i64 {
        self.created_millis
    }

    /// Whether this timer discards everything.
    pub fn is_noop(&self) -> bool {
        self.inner.is_none()
    }

    /// Records a duration.
    pub fn record(&self, duration: Duration) {
        self.record_nanos(duration.as_nanos().min(u64::MAX as u128) as u64);
    }

    /// Records a duration given in nanoseconds.
    pub fn record_nanos(&self, nanos: u64) {
        if let Some(inner) = &self.inner {
            inner.distribution.record(nanos as f64);
        }
    }

    /// Starts a sample against `clock`, to be stopped against whichever timer ends up owning it.
    pub fn start(clock: &SharedClock) -> TimerSample {
        TimerSample::start(clock)
    }

    /// Times `f` with this timer's clock and returns what it returns.
    pub fn record_fn<T, F: FnOnce() -> T>(&self, f: F) -> T {
        let Some(inner) = &self.inner else {
            return f();
        };
        let start = inner.clock.monotonic_time_nanos();
        let result = f();
        let elapsed = inner.clock.monotonic_time_nanos().saturating_sub(start);
        self.record_nanos(elapsed.max(0) as u64);
        result
    }

    /// Number of recorded events since creation.
    pub fn count(&self) -> u64 {
        self.inner.as_ref().map_or(0, |inner| inner.distribution.count())
    }

    /// Sum of recorded durations since creation.
    pub fn total_time(&self, unit: TimeUnit) -> f64 {
        self.inner.as_ref().map_or(0.0, |inner| unit.from_nanos(inner.distribution.total()))
    }

    /// Largest recorded duration in the step in progress or the last closed one.
    pub fn max(&self, unit: TimeUnit) -> f64 {
        self.inner.as_ref().map_or(0.0, |inner| unit.from_nanos(inner.distribution.max()))
    }

    /// Count, total, max and histogram data, in nanoseconds.
    pub fn snapshot(&self, temporality: AggregationTemporality) -> HistogramSnapshot {
        self.inner
            .as_ref()
            .map_or_else(HistogramSnapshot::default, |inner| inner.distribution.take_snapshot(temporality))
    }

    /// Histogram bucket bounds in nanoseconds, ending with `+Inf`, or empty.
    pub fn bucket_bounds(&self) -> &[f64] {
        self.inner.as_ref().map(|inner| inner.distribution.bucket_bounds()).unwrap_or_default()
    }

    /// Takes the exemplars of the last closed step. Values are in nanoseconds.
    pub fn drain_exemplars(&self) -> Vec<Exemplar> {
        self.inner.as_ref().map(|inner| inner.distribution.drain_exemplars()).unwrap_or_default()
    }

    pub(crate) fn rollover(&self) {
        if let Some(inner) = &self.inner {
            inner.distribution.rollover();
        }
    }

    pub(crate) fn close(&self) {
        if let Some(inner) = &self.inner {
            inner.distribution.close();
        }
    }
}

/// A running measurement started from a clock and stopped against a timer.
#[derive(Clone)]
pub struct TimerSample {
    clock: SharedClock,
    start_nanos: i64,
}

impl TimerSample {
    /// Starts a sample now.
    pub fn start(clock: &SharedClock) -> Self {
        Self { clock: clock.clone(), start_nanos: clock.monotonic_time_nanos() }
    }

    /// Time elapsed since the sample started.
    pub fn elapsed(&self) -> Duration {
        let nanos = self.clock.monotonic_time_nanos().saturating_sub(self.start_nanos);
        Duration::from_nanos(nanos.max(0) as u64)
    }

    /// Records the elapsed time into `timer`, returning it.
    pub fn stop(self, timer: &Timer) -> Duration {
        let elapsed = self.elapsed();
        timer.record(elapsed);
        elapsed
    }
}

impl std::fmt::Debug for TimerSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerSample").field("start_nanos", &self.start_nanos).finish()
    }
}

/// A stack of samples for nested timing scopes.
///
/// Each [`push`](Self::push) opens a scope and each [`pop`](Self::pop) closes the innermost one,
/// recording it into the given timer. The stack belongs to whoever holds it: it is not shared
/// with other threads or tasks, so a scope opened on one thread must be closed on the same stack.
#[derive(Debug)]
pub struct TimingScope {
    clock: SharedClock,
    samples: Vec<TimerSample>,
}

impl TimingScope {
    /// Creates an empty stack.
    pub fn new(clock: SharedClock) -> Self {
        Self { clock, samples: Vec::new() }
    }

    /// Opens a scope.
    pub fn push(&mut self) {
        self.samples.push(TimerSample::start(&self.clock));
    }

    /// Closes the innermost scope, recording it into `timer`. Returns `None` when no scope is
    /// open.
    pub fn pop(&mut self, timer: &Timer) -> Option<Duration> {
        self.samples.pop().map(|sample| sample.stop(timer))
    }

    /// Number of open scopes.
    pub fn depth(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::{Timer, TimingScope};
    use crate::{AggregationTemporality, Id, MeterContext, RegistryConfig, TimeUnit};
    use stepmeter_util::{DistributionConfig, MockClock};
    use std::time::Duration;

    fn context() -> (std::sync::Arc<MockClock>, MeterContext) {
        let (mock, clock) = MockClock::shared();
        (mock, MeterContext::new(clock, RegistryConfig::new()))
    }

    #[test]
    fn cumulative_and_delta_views_of_one_step() {
        let (mock, context) = context();
        let timer = Timer::new(Id::named("http.requests"), &DistributionConfig::new(), &context).unwrap();

        for millis in [10, 77, 111] {
            timer.record(Duration::from_millis(millis));
        }

        let cumulative = timer.snapshot(AggregationTemporality::Cumulative);
        assert_eq!(cumulative.count, 3);
        assert_eq!(TimeUnit::Milliseconds.from_nanos(cumulative.total), 198.0);
        assert_eq!(TimeUnit::Milliseconds.from_nanos(cumulative.max), 111.0);
        assert_eq!(timer.snapshot(AggregationTemporality::Delta).count, 0);

        mock.add(Duration::from_secs(60));
        let delta = timer.snapshot(AggregationTemporality::Delta);
        assert_eq!(delta.count, 3);
        assert_eq!(TimeUnit::Milliseconds.from_nanos(delta.total), 198.0);
        assert_eq!(timer.max(TimeUnit::Milliseconds), 111.0);
    }

    #[test]
    fn samples_and_scopes_use_the_monotonic_clock() {
        let (mock, context) = context();
        let timer = Timer::new(Id::named("work"), &DistributionConfig::new(), &context).unwrap();

        let sample = Timer::start(context.clock());
        mock.add(Duration::from_millis(5));
        assert_eq!(sample.stop(&timer), Duration::from_millis(5));

        let mut scope = TimingScope::new(context.clock().clone());
        scope.push();
        mock.add(Duration::from_millis(1));
        scope.push();
        mock.add(Duration::from_millis(2));
        assert_eq!(scope.pop(&timer), Some(Duration::from_millis(2)));
        assert_eq!(scope.pop(&timer), Some(Duration::from_millis(3)));
        assert_eq!(scope.pop(&timer), None);
        assert_eq!(scope.depth(), 0);

        assert_eq!(timer.count(), 3);
        assert_eq!(timer.total_time(TimeUnit::Milliseconds), 10.0);
    }

    #[test]
    fn record_fn_times_the_closure() {
        let (mock, context) = context();
        let timer = Timer::new(Id::named("closure"), &DistributionConfig::new(), &context).unwrap();
        let value = timer.record_fn(|| {
            mock.add(Duration::from_micros(250));
            42
        });
        assert_eq!(value, 42);
        assert_eq!(timer.total_time(TimeUnit::Microseconds), 250.0);

        let noop = Timer::noop(Id::named("noop"));
        assert_eq!(noop.record_fn(|| 7), 7);
        assert_eq!(noop.count(), 0);
    }
}
