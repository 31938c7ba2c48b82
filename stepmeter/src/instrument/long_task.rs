use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use stepmeter_util::{
    histogram::{CountAtBucket, ValueAtPercentile},
    Clock, DistributionConfig, HistogramSnapshot, SharedClock,
};

use crate::{Id, MeterContext, TimeUnit};

/// Durations of tasks that are still running.
///
/// Unlike a [`Timer`](crate::Timer), which records an event once it completes, a long task timer
/// reports on tasks in flight: how many there are, how long they have been running in total and
/// the longest-running one. The report is the same under either temporality, since it describes
/// the present rather than a step.
#[derive(Debug)]
pub struct LongTaskTimer {
    id: Id,
    created_millis: i64,
    inner: Option<LongTaskState>,
}

#[derive(Debug)]
struct LongTaskState {
    clock: SharedClock,
    next_task: AtomicU64,
    // Task id to start time in monotonic nanoseconds. Ids grow, so the first entry is the oldest.
    active: Mutex<BTreeMap<u64, i64>>,
    bounds: Arc<[f64]>,
    percentiles: Arc<[f64]>,
}

impl LongTaskTimer {
    /// Creates a new `LongTaskTimer`. Bucket bounds and percentiles come from `config`.
    pub fn new(id: Id, config: &DistributionConfig, context: &MeterContext) -> Self {
        Self {
            id,
            created_millis: context.now_millis(),
            inner: Some(LongTaskState {
                clock: context.clock().clone(),
                next_task: AtomicU64::new(0),
                active: Mutex::new(BTreeMap::new()),
                bounds: config.histogram_buckets().into(),
                percentiles: config.percentiles().into(),
            }),
        }
    }

    /// Default expected range of a long task: two minutes to two hours, in nanoseconds.
    pub fn default_config() -> DistributionConfig {
        DistributionConfig::new()
            .with_minimum_expected_value(120_000_000_000.0)
            .with_maximum_expected_value(7_200_000_000_000.0)
    }

    /// Creates a no-op `LongTaskTimer` which does nothing.
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

    /// Starts timing a task. The task counts as active until the sample is stopped.
    pub fn start(self: &Arc<Self>) -> LongTaskSample {
        let Some(inner) = &self.inner else {
            return LongTaskSample { timer: None, task: 0, start_nanos: 0 };
        };
        let task = inner.next_task.fetch_add(1, Ordering::Relaxed);
        let start_nanos = inner.clock.monotonic_time_nanos();
        inner.active.lock().insert(task, start_nanos);
        LongTaskSample { timer: Some(Arc::clone(self)), task, start_nanos }
    }

    /// Number of tasks in flight.
    pub fn active_tasks(&self) -> usize {
        self.inner.as_ref().map_or(0, |inner| inner.active.lock().len())
    }

    /// Combined running time of the tasks in flight.
    pub fn duration(&self, unit: TimeUnit) -> f64 {
        unit.from_nanos(self.durations().iter().sum())
    }

    /// Running time of the oldest task in flight.
    pub fn max(&self, unit: TimeUnit) -> f64 {
        let Some(inner) = &self.inner else {
            return 0.0;
        };
        let now = inner.clock.monotonic_time_nanos();
        let oldest = inner.active.lock().values().next().copied();
        oldest.map_or(0.0, |start| unit.from_nanos(now.saturating_sub(start).max(0) as f64))
    }

    /// Active count, total and maximum running time, plus bucket counts and percentiles over
    /// running times, all in nanoseconds.
    pub fn snapshot(&self) -> HistogramSnapshot {
        let Some(inner) = &self.inner else {
            return HistogramSnapshot::default();
        };

        let mut durations = self.durations();
        durations.sort_by(f64::total_cmp);
        let total = durations.iter().sum();
        let max = durations.last().copied().unwrap_or(0.0);
        let mut snapshot = HistogramSnapshot::empty(durations.len() as u64, total, max);

        if !inner.bounds.is_empty() {
            let mut lower = 0;
            snapshot.histogram_counts = inner
                .bounds
                .iter()
                .map(|bucket| {
                    let upper = durations.partition_point(|d| d <= bucket);
                    let count = (upper - lower) as u64;
                    lower = upper;
                    CountAtBucket { bucket: *bucket, count }
                })
                .collect();
        }

        snapshot.percentile_values = inner
            .percentiles
            .iter()
            .map(|p| ValueAtPercentile { percentile: *p, value: nearest_rank(&durations, *p) })
            .collect();

        snapshot
    }

    /// Histogram bucket bounds in nanoseconds, ending with `+Inf`, or empty.
    pub fn bucket_bounds(&self) -> &[f64] {
        self.inner.as_ref().map(|inner| &*inner.bounds).unwrap_or_default()
    }

    fn durations(&self) -> Vec<f64> {
        let Some(inner) = &self.inner else {
            return Vec::new();
        };
        let now = inner.clock.monotonic_time_nanos();
        inner.active.lock().values().map(|start| now.saturating_sub(*start).max(0) as f64).collect()
    }

    fn stop(&self, task: u64, start_nanos: i64) -> Duration {
        let Some(inner) = &self.inner else {
            return Duration::ZERO;
        };
        if inner.active.lock().remove(&task).is_none() {
            return Duration::ZERO;
        }
        let elapsed = inner.clock.monotonic_time_nanos().saturating_sub(start_nanos);
        Duration::from_nanos(elapsed.max(0) as u64)
    }
}

fn nearest_rank(sorted: &[f64], percentile: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (percentile * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// A task being timed by a [`LongTaskTimer`].
#[derive(Debug)]
#[must_use = "the task stays active until the sample is stopped"]
pub struct LongTaskSample {
    timer: Option<Arc<LongTaskTimer>>,
    task: u64,
    start_nanos: i64,
}

impl LongTaskSample {
    /// Marks the task as finished, returning how long it ran.
    pub fn stop(self) -> Duration {
        match &self.timer {
            Some(timer) => timer.stop(self.task, self.start_nanos),
            None => Duration::ZERO,
        }
    }
}
