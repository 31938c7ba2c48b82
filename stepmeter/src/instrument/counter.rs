use std::sync::atomic::Ordering;

use portable_atomic::AtomicF64;
use stepmeter_util::{DoubleSum, Exemplar, ExemplarReservoir, StepWindow};

use crate::{AggregationTemporality, Id, MeterContext};

/// A monotonically increasing count.
#[derive(Debug)]
pub struct Counter {
    id: Id,
    created_millis: i64,
    inner: Option<CounterState>,
}

#[derive(Debug)]
struct CounterState {
    total: AtomicF64,
    step: StepWindow<DoubleSum>,
    exemplars: Option<ExemplarReservoir>,
}

impl Counter {
    /// Creates a new `Counter`. Meter factories call this; applications go through
    /// [`MeterRegistry::counter`](crate::MeterRegistry::counter).
    pub fn new(id: Id, context: &MeterContext) -> Self {
        Self {
            id,
            created_millis: context.now_millis(),
            inner: Some(CounterState {
                total: AtomicF64::new(0.0),
                step: StepWindow::new(context.clock().clone(), context.step()),
                exemplars: context.reservoir(&[]),
            }),
        }
    }

    /// Creates a no-op `Counter` which does nothing.
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

    /// Increments the counter by one.
    pub fn increment(&self) {
        self.increment_by(1.0);
    }

    /// Increments the counter by `amount`. Negative and `NaN` amounts are dropped.
    pub fn increment_by(&self, amount: f64) {
        let Some(inner) = &self.inner else {
            return;
        };
        if !(amount >= 0.0) {
            return;
        }
        inner.total.fetch_add(amount, Ordering::AcqRel);
        inner.step.record(amount);
        if let Some(exemplars) = &inner.exemplars {
            exemplars.sample(amount);
        }
    }

    /// Total since creation.
    pub fn count(&self) -> f64 {
        self.inner.as_ref().map_or(0.0, |inner| inner.total.load(Ordering::Acquire))
    }

    /// Amount accrued in the last closed step.
    pub fn step_count(&self) -> f64 {
        self.inner.as_ref().map_or(0.0, |inner| inner.step.poll())
    }

    /// Value under the given temporality.
    pub fn value(&self, temporality: AggregationTemporality) -> f64 {
        match temporality {
            AggregationTemporality::Cumulative => self.count(),
            AggregationTemporality::Delta => self.step_count(),
        }
    }

    /// Takes the exemplars of the last closed step.
    pub fn drain_exemplars(&self) -> Vec<Exemplar> {
        self.inner
            .as_ref()
            .and_then(|inner| inner.exemplars.as_ref())
            .map(ExemplarReservoir::drain)
            .unwrap_or_default()
    }

    pub(crate) fn rollover(&self) {
        if let Some(inner) = &self.inner {
            inner.step.rollover();
        }
    }

    pub(crate) fn close(&self) {
        if let Some(inner) = &self.inner {
            inner.step.close();
            if let Some(exemplars) = &inner.exemplars {
                exemplars.close();
            }
        }
    }
}
