use std::sync::atomic::Ordering;

use portable_atomic::AtomicF64;
use stepmeter_util::{DoubleSum, StepAccumulator, StepWindow};

use crate::{AggregationTemporality, Id, MeterContext, TimeUnit, ValueSource};

/// Tracks the last reading of a monotonic source and turns readings into increments.
#[derive(Debug)]
struct Baseline(AtomicF64);

impl Baseline {
    fn new() -> Self {
        Self(AtomicF64::new(0.0))
    }

    /// Increment since the previous reading. A reading below the previous one means the source
    /// was reset, so the whole reading counts as the increment.
    fn advance(&self, reading: f64) -> f64 {
        let previous = self.0.swap(reading, Ordering::AcqRel);
        if reading >= previous {
            reading - previous
        } else {
            reading
        }
    }
}

/// A monotonic count read from a [`ValueSource`], such as a cache's hit count.
#[derive(Debug)]
pub struct FunctionCounter {
    id: Id,
    created_millis: i64,
    inner: Option<FunctionCounterState>,
}

#[derive(Debug)]
struct FunctionCounterState {
    source: ValueSource,
    baseline: Baseline,
    step: StepWindow<DoubleSum>,
}

impl FunctionCounterState {
    fn sample_into(&self, current: &DoubleSum) {
        if let Some(reading) = self.source.sample().filter(|r| r.is_finite()) {
            current.record(self.baseline.advance(reading));
        }
    }
}

impl FunctionCounter {
    /// Creates a new `FunctionCounter` reading `source`.
    pub fn new(id: Id, source: ValueSource, context: &MeterContext) -> Self {
        Self {
            id,
            created_millis: context.now_millis(),
            inner: Some(FunctionCounterState {
                source,
                baseline: Baseline::new(),
                step: StepWindow::new(context.clock().clone(), context.step()),
            }),
        }
    }

    /// Creates a no-op `FunctionCounter` which always reads `NaN`.
    pub fn noop(id: Id) -> Self {
        Self { id, created_millis: 0, inner: None }
    }

    /// Identity of this counter.
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Wall time this counter was created at, in milliseconds since the Unix epoch.
    pub fn created_millis(&self) -> i64 {
        self.created_millis
    }

    /// Whether this counter discards everything.
    pub fn is_noop(&self) -> bool {
        self.inner.is_none()
    }

    /// Current reading of the source, or `NaN` when the source is gone.
    pub fn count(&self) -> f64 {
        self.inner.as_ref().map_or(f64::NAN, |inner| inner.source.value())
    }

    /// Increase of the source over the last closed step. The source is read at each rollover.
    pub fn step_count(&self) -> f64 {
        self.inner
            .as_ref()
            .map_or(0.0, |inner| inner.step.poll_with(|current| inner.sample_into(current)))
    }

    /// Value under the given temporality.
    pub fn value(&self, temporality: AggregationTemporality) -> f64 {
        match temporality {
            AggregationTemporality::Cumulative => self.count(),
            AggregationTemporality::Delta => self.step_count(),
        }
    }

    /// Whether the source can still be read.
    pub fn is_alive(&self) -> bool {
        self.inner.as_ref().is_some_and(|inner| inner.source.sample().is_some())
    }

    pub(crate) fn rollover(&self) {
        self.step_count();
    }

    pub(crate) fn close(&self) {
        if let Some(inner) = &self.inner {
            inner.step.poll_with(|current| inner.sample_into(current));
            if let Some(reading) = inner.source.sample().filter(|r| r.is_finite()) {
                inner.step.record(inner.baseline.advance(reading));
            }
            inner.step.close();
        }
    }
}

/// A count and a total time read from a pair of [`ValueSource`]s, such as a thread pool's
/// completed task count and busy time.
#[derive(Debug)]
pub struct FunctionTimer {
    id: Id,
    created_millis: i64,
    inner: Option<FunctionTimerState>,
}

#[derive(Debug)]
struct FunctionTimerState {
    count: ValueSource,
    total: ValueSource,
    total_unit: TimeUnit,
    count_baseline: Baseline,
    total_baseline: Baseline,
    // Count and total time in nanoseconds.
    step: StepWindow<(DoubleSum, DoubleSum)>,
}

impl FunctionTimerState {
    fn readings(&self) -> Option<(f64, f64)> {
        let count = self.count.sample().filter(|c| c.is_finite())?;
        let total = self.total.sample().filter(|t| t.is_finite())?;
        Some((count, self.total_unit.to_nanos(total)))
    }

    fn sample_into(&self, current: &(DoubleSum, DoubleSum)) {
        if let Some((count, total)) = self.readings() {
            current.record((self.count_baseline.advance(count), self.total_baseline.advance(total)));
        }
    }
}

impl FunctionTimer {
    /// Creates a new `FunctionTimer` whose total time source reads in `total_unit`.
    pub fn new(
        id: Id,
        count: ValueSource,
        total: ValueSource,
        total_unit: TimeUnit,
        context: &MeterContext,
    ) -> Self {
        Self {
            id,
            created_millis: context.now_millis(),
            inner: Some(FunctionTimerState {
                count,
                total,
                total_unit,
                count_baseline: Baseline::new(),
                total_baseline: Baseline::new(),
                step: StepWindow::new(context.clock().clone(), context.step()),
            }),
        }
    }

    /// Creates a no-op `FunctionTimer` which always reads `NaN`.
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

    /// Current count reading, or `NaN` when the source is gone.
    pub fn count(&self) -> f64 {
        self.inner.as_ref().map_or(f64::NAN, |inner| inner.count.value())
    }

    /// Current total time reading converted to `unit`, or `NaN` when the source is gone.
    pub fn total_time(&self, unit: TimeUnit) -> f64 {
        self.inner
            .as_ref()
            .map_or(f64::NAN, |inner| unit.from_nanos(inner.total_unit.to_nanos(inner.total.value())))
    }

    /// Count and total time, in nanoseconds, accrued over the last closed step.
    pub fn step_values(&self) -> (f64, f64) {
        self.inner.as_ref().map_or((0.0, 0.0), |inner| {
            inner.step.poll_with(|current| inner.sample_into(current))
        })
    }

    /// Count and total time, in nanoseconds, under the given temporality.
    pub fn values(&self, temporality: AggregationTemporality) -> (f64, f64) {
        match temporality {
            AggregationTemporality::Cumulative => (self.count(), self.total_time(TimeUnit::Nanoseconds)),
            AggregationTemporality::Delta => self.step_values(),
        }
    }

    /// Whether both sources can still be read.
    pub fn is_alive(&self) -> bool {
        self.inner.as_ref().is_some_and(|inner| inner.readings().is_some())
    }

    pub(crate) fn rollover(&self) {
        self.step_values();
    }

    pub(crate) fn close(&self) {
        if let Some(inner) = &self.inner {
            inner.step.poll_with(|current| inner.sample_into(current));
            if let Some((count, total)) = inner.readings() {
                inner.step.record((inner.count_baseline.advance(count), inner.total_baseline.advance(total)));
            }
            inner.step.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FunctionCounter, FunctionTimer};
    use crate::{AggregationTemporality, Id, MeterContext, RegistryConfig, TimeUnit, ValueSource};
    use stepmeter_util::MockClock;
    use std::{
        sync::{
            atomic::{AtomicU64, Ordering},
            Arc,
        },
        time::Duration,
    };

    const STEP: Duration = Duration::from_secs(60);

    #[test]
    fn function_counter_delta_is_the_increase_over_the_step() {
        let (mock, clock) = MockClock::shared();
        let context = MeterContext::new(clock, RegistryConfig::new());
        let hits = Arc::new(AtomicU64::new(0));
        let counter = FunctionCounter::new(
            Id::named("cache.hits"),
            ValueSource::weak(&hits, |h| h.load(Ordering::Relaxed) as f64),
            &context,
        );

        hits.store(5, Ordering::Relaxed);
        assert_eq!(counter.value(AggregationTemporality::Delta), 0.0);
        assert_eq!(counter.value(AggregationTemporality::Cumulative), 5.0);

        mock.add(STEP);
        assert_eq!(counter.step_count(), 5.0);

        hits.store(12, Ordering::Relaxed);
        mock.add(STEP);
        assert_eq!(counter.step_count(), 7.0);

        // A reset counts the fresh reading in full.
        hits.store(3, Ordering::Relaxed);
        mock.add(STEP);
        assert_eq!(counter.step_count(), 3.0);

        mock.add(STEP);
        assert_eq!(counter.step_count(), 0.0);
    }

    #[test]
    fn function_counter_goes_dark_when_its_source_is_dropped() {
        let (_mock, clock) = MockClock::shared();
        let context = MeterContext::new(clock, RegistryConfig::new());
        let hits = Arc::new(AtomicU64::new(1));
        let counter = FunctionCounter::new(
            Id::named("cache.hits"),
            ValueSource::weak(&hits, |h| h.load(Ordering::Relaxed) as f64),
            &context,
        );
        assert!(counter.is_alive());
        drop(hits);
        assert!(!counter.is_alive());
        assert!(counter.count().is_nan());
    }

    #[test]
    fn function_timer_converts_total_time() {
        let (mock, clock) = MockClock::shared();
        let context = MeterContext::new(clock, RegistryConfig::new());
        let completed = Arc::new(AtomicU64::new(0));
        let busy_millis = Arc::new(AtomicU64::new(0));
        let timer = FunctionTimer::new(
            Id::named("pool.tasks"),
            ValueSource::weak(&completed, |c| c.load(Ordering::Relaxed) as f64),
            ValueSource::weak(&busy_millis, |b| b.load(Ordering::Relaxed) as f64),
            TimeUnit::Milliseconds,
            &context,
        );

        completed.store(4, Ordering::Relaxed);
        busy_millis.store(250, Ordering::Relaxed);
        assert_eq!(timer.count(), 4.0);
        assert_eq!(timer.total_time(TimeUnit::Seconds), 0.25);

        mock.add(STEP);
        let (count, total_nanos) = timer.values(AggregationTemporality::Delta);
        assert_eq!(count, 4.0);
        assert_eq!(TimeUnit::Milliseconds.from_nanos(total_nanos), 250.0);
    }

    #[test]
    fn close_flushes_the_partial_step() {
        let (_mock, clock) = MockClock::shared();
        let context = MeterContext::new(clock, RegistryConfig::new());
        let hits = Arc::new(AtomicU64::new(9));
        let counter = FunctionCounter::new(
            Id::named("cache.hits"),
            ValueSource::strong(hits, |h| h.load(Ordering::Relaxed) as f64),
            &context,
        );
        counter.close();
        assert_eq!(counter.step_count(), 9.0);
    }
}
