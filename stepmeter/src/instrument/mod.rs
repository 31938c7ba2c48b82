//! Instruments.
//!
//! Every instrument is one variant of [`Meter`]. Each variant offers its own recording API, and
//! they all share [`Meter::measure`] for reading a flat list of [`Measurement`]s.
use std::{fmt, sync::Arc};

mod counter;
mod custom;
mod distribution;
mod function;
mod gauge;
mod long_task;
mod summary;
mod timer;

pub use self::counter::Counter;
pub use self::custom::CustomMeter;
pub use self::function::{FunctionCounter, FunctionTimer};
pub use self::gauge::Gauge;
pub use self::long_task::{LongTaskSample, LongTaskTimer};
pub use self::summary::DistributionSummary;
pub use self::timer::{Timer, TimerSample, TimingScope};

use crate::{AggregationTemporality, Id, MeterKind, TimeUnit};

/// What a measurement describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Statistic {
    /// Number of events.
    Count,
    /// Sum of amounts.
    Total,
    /// Sum of durations.
    TotalTime,
    /// Largest amount or duration.
    Max,
    /// Instantaneous value.
    Value,
    /// Number of tasks in flight.
    ActiveTasks,
    /// Combined running time of tasks in flight.
    Duration,
    /// Anything else.
    Unknown,
}

impl Statistic {
    /// Lowercase name, as exported in the `statistic` attribute.
    pub fn as_str(&self) -> &'static str {
        match self {
            Statistic::Count => "count",
            Statistic::Total => "total",
            Statistic::TotalTime => "total",
            Statistic::Max => "max",
            Statistic::Value => "value",
            Statistic::ActiveTasks => "active",
            Statistic::Duration => "duration",
            Statistic::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named value read from a meter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Measurement {
    /// What the value describes.
    pub statistic: Statistic,
    /// The value.
    pub value: f64,
}

impl Measurement {
    /// Creates a new `Measurement`.
    pub fn new(statistic: Statistic, value: f64) -> Self {
        Self { statistic, value }
    }
}

/// A registered instrument.
///
/// Cloning a `Meter` clones a handle; every clone addresses the same instrument.
#[derive(Clone, Debug)]
pub enum Meter {
    /// A [`Counter`].
    Counter(Arc<Counter>),
    /// A [`Gauge`].
    Gauge(Arc<Gauge>),
    /// A [`Timer`].
    Timer(Arc<Timer>),
    /// A [`DistributionSummary`].
    DistributionSummary(Arc<DistributionSummary>),
    /// A [`LongTaskTimer`].
    LongTaskTimer(Arc<LongTaskTimer>),
    /// A [`FunctionCounter`].
    FunctionCounter(Arc<FunctionCounter>),
    /// A [`FunctionTimer`].
    FunctionTimer(Arc<FunctionTimer>),
    /// A [`CustomMeter`].
    Custom(Arc<CustomMeter>),
}

impl Meter {
    /// Creates a no-op meter of the kind `id` names.
    pub fn noop(id: Id) -> Self {
        match id.kind() {
            MeterKind::Counter => Meter::Counter(Arc::new(Counter::noop(id))),
            MeterKind::Gauge => Meter::Gauge(Arc::new(Gauge::noop(id))),
            MeterKind::Timer => Meter::Timer(Arc::new(Timer::noop(id))),
            MeterKind::DistributionSummary => {
                Meter::DistributionSummary(Arc::new(DistributionSummary::noop(id)))
            }
            MeterKind::LongTaskTimer => Meter::LongTaskTimer(Arc::new(LongTaskTimer::noop(id))),
            MeterKind::FunctionCounter => Meter::FunctionCounter(Arc::new(FunctionCounter::noop(id))),
            MeterKind::FunctionTimer => Meter::FunctionTimer(Arc::new(FunctionTimer::noop(id))),
            MeterKind::Custom => Meter::Custom(Arc::new(CustomMeter::noop(id))),
        }
    }

    /// Identity of the meter.
    pub fn id(&self) -> &Id {
        match self {
            Meter::Counter(m) => m.id(),
            Meter::Gauge(m) => m.id(),
            Meter::Timer(m) => m.id(),
            Meter::DistributionSummary(m) => m.id(),
            Meter::LongTaskTimer(m) => m.id(),
            Meter::FunctionCounter(m) => m.id(),
            Meter::FunctionTimer(m) => m.id(),
            Meter::Custom(m) => m.id(),
        }
    }

    /// Kind of the meter.
    pub fn kind(&self) -> MeterKind {
        match self {
            Meter::Counter(_) => MeterKind::Counter,
            Meter::Gauge(_) => MeterKind::Gauge,
            Meter::Timer(_) => MeterKind::Timer,
            Meter::DistributionSummary(_) => MeterKind::DistributionSummary,
            Meter::LongTaskTimer(_) => MeterKind::LongTaskTimer,
            Meter::FunctionCounter(_) => MeterKind::FunctionCounter,
            Meter::FunctionTimer(_) => MeterKind::FunctionTimer,
            Meter::Custom(_) => MeterKind::Custom,
        }
    }

    /// Wall time the meter was created at, in milliseconds since the Unix epoch.
    pub fn created_millis(&self) -> i64 {
        match self {
            Meter::Counter(m) => m.created_millis(),
            Meter::Gauge(m) => m.created_millis(),
            Meter::Timer(m) => m.created_millis(),
            Meter::DistributionSummary(m) => m.created_millis(),
            Meter::LongTaskTimer(m) => m.created_millis(),
            Meter::FunctionCounter(m) => m.created_millis(),
            Meter::FunctionTimer(m) => m.created_millis(),
            Meter::Custom(m) => m.created_millis(),
        }
    }

    /// Reads the meter as a flat list of measurements. Durations are in `unit`.
    pub fn measure(&self, temporality: AggregationTemporality, unit: TimeUnit) -> Vec<Measurement> {
        use Statistic::*;

        match self {
            Meter::Counter(m) => vec![Measurement::new(Count, m.value(temporality))],
            Meter::Gauge(m) => vec![Measurement::new(Value, m.value())],
            Meter::Timer(m) => {
                let s = m.snapshot(temporality);
                vec![
                    Measurement::new(Count, s.count as f64),
                    Measurement::new(TotalTime, unit.from_nanos(s.total)),
                    Measurement::new(Max, unit.from_nanos(s.max)),
                ]
            }
            Meter::DistributionSummary(m) => {
                let s = m.snapshot(temporality);
                vec![
                    Measurement::new(Count, s.count as f64),
                    Measurement::new(Total, s.total),
                    Measurement::new(Max, s.max),
                ]
            }
            Meter::LongTaskTimer(m) => vec![
                Measurement::new(ActiveTasks, m.active_tasks() as f64),
                Measurement::new(Duration, m.duration(unit)),
            ],
            Meter::FunctionCounter(m) => vec![Measurement::new(Count, m.value(temporality))],
            Meter::FunctionTimer(m) => {
                let (count, total) = m.values(temporality);
                vec![Measurement::new(Count, count), Measurement::new(TotalTime, unit.from_nanos(total))]
            }
            Meter::Custom(m) => m.measure(),
        }
    }

    /// Rolls every step window of the meter over if a boundary has passed.
    pub fn rollover(&self) {
        match self {
            Meter::Counter(m) => m.rollover(),
            Meter::Timer(m) => m.rollover(),
            Meter::DistributionSummary(m) => m.rollover(),
            Meter::FunctionCounter(m) => m.rollover(),
            Meter::FunctionTimer(m) => m.rollover(),
            Meter::Gauge(_) | Meter::LongTaskTimer(_) | Meter::Custom(_) => {}
        }
    }

    /// Closes the step in progress so it can be read one last time.
    pub fn close(&self) {
        match self {
            Meter::Counter(m) => m.close(),
            Meter::Timer(m) => m.close(),
            Meter::DistributionSummary(m) => m.close(),
            Meter::FunctionCounter(m) => m.close(),
            Meter::FunctionTimer(m) => m.close(),
            Meter::Gauge(_) | Meter::LongTaskTimer(_) | Meter::Custom(_) => {}
        }
    }
}
