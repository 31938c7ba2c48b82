//! State shared by timers and distribution summaries.
use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use portable_atomic::AtomicF64;
use stepmeter_util::{
    DistributionConfig, DoubleMax, DoubleSum, Exemplar, ExemplarReservoir, HistogramSnapshot, LongSum,
    StepWindow, WindowedHistogram,
};

use crate::{AggregationTemporality, Id, MeterContext, MeterError};

pub(crate) struct Distribution {
    count: AtomicU64,
    total: AtomicF64,
    step: StepWindow<(LongSum, DoubleSum)>,
    max: StepWindow<DoubleMax>,
    histogram: Option<Box<dyn WindowedHistogram>>,
    exemplars: Option<ExemplarReservoir>,
}

impl Distribution {
    pub(crate) fn new(id: &Id, config: &DistributionConfig, context: &MeterContext) -> Result<Self, MeterError> {
        let histogram = context.histogram(id, config)?;
        let bounds = histogram.as_ref().map(|h| h.bucket_bounds()).unwrap_or_default();
        let exemplars = context.reservoir(bounds);
        Ok(Self {
            count: AtomicU64::new(0),
            total: AtomicF64::new(0.0),
            step: StepWindow::new(context.clock().clone(), context.step()),
            max: StepWindow::new(context.clock().clone(), context.step()),
            histogram,
            exemplars,
        })
    }

    /// Negative and `NaN` values are dropped.
    pub(crate) fn record(&self, value: f64) {
        if !(value >= 0.0) {
            return;
        }
        self.count.fetch_add(1, Ordering::AcqRel);
        self.total.fetch_add(value, Ordering::AcqRel);
        self.step.record((1, value));
        self.max.record(value);
        if let Some(histogram) = &self.histogram {
            histogram.record(value);
        }
        if let Some(exemplars) = &self.exemplars {
            exemplars.sample(value);
        }
    }

    pub(crate) fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    pub(crate) fn total(&self) -> f64 {
        self.total.load(Ordering::Acquire)
    }

    /// Largest value seen in the step in progress or the last closed one.
    pub(crate) fn max(&self) -> f64 {
        self.max.current().max(self.max.poll())
    }

    pub(crate) fn take_snapshot(&self, temporality: AggregationTemporality) -> HistogramSnapshot {
        let (count, total, max) = match temporality {
            AggregationTemporality::Cumulative => (self.count(), self.total(), self.max()),
            AggregationTemporality::Delta => {
                let (count, total) = self.step.poll();
                (count, total, self.max.poll())
            }
        };
        match &self.histogram {
            Some(histogram) => histogram.snapshot(count, total, max),
            None => HistogramSnapshot::empty(count, total, max),
        }
    }

    pub(crate) fn bucket_bounds(&self) -> &[f64] {
        self.histogram.as_ref().map(|h| h.bucket_bounds()).unwrap_or_default()
    }

    pub(crate) fn drain_exemplars(&self) -> Vec<Exemplar> {
        self.exemplars.as_ref().map(ExemplarReservoir::drain).unwrap_or_default()
    }

    pub(crate) fn rollover(&self) {
        self.step.rollover();
        self.max.rollover();
    }

    pub(crate) fn close(&self) {
        self.step.close();
        self.max.close();
        if let Some(histogram) = &self.histogram {
            histogram.close();
        }
        if let Some(exemplars) = &self.exemplars {
            exemplars.close();
        }
    }
}

impl fmt::Debug for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Distribution")
            .field("count", &self.count())
            .field("total", &self.total())
            .field("histogram", &self.histogram)
            .field("exemplars", &self.exemplars.is_some())
            .finish()
    }
}
