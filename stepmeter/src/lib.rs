//! A meter registry with step-windowed aggregation.
//!
//! Application code records through typed meters handed out by a [`MeterRegistry`]:
//! [`Counter`], [`Gauge`], [`Timer`], [`DistributionSummary`], [`LongTaskTimer`],
//! [`FunctionCounter`], [`FunctionTimer`] and [`CustomMeter`]. Every meter is addressed by an
//! [`Id`], a name plus a set of [`Tag`]s, and the registry constructs at most one meter per
//! identity no matter how many threads ask for it at once.
//!
//! # Steps and temporality
//!
//! Time is cut into fixed-length steps (one minute unless configured otherwise). Meters keep
//! both a running total and the amount accrued in the last fully closed step, so an exporter can
//! report either under [`AggregationTemporality::Cumulative`] or
//! [`AggregationTemporality::Delta`]. Moving from one step to the next happens exactly once per
//! boundary, lazily on first touch or eagerly through [`MeterRegistry::pump_rollover`].
//!
//! # Filters
//!
//! A registry's [`filter`]s can rewrite identities, deny them (handing out no-op meters that are
//! never stored) and adjust the distribution configuration of timers and summaries.
//!
//! # Recording never fails
//!
//! Recording methods return nothing. Values a meter cannot use, such as negative amounts on a
//! counter, are dropped. Errors only surface from registration: asking for an identity under a
//! second kind, or a distribution configuration that cannot back a histogram.
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod config;
pub use self::config::{AggregationTemporality, RegistryConfig, TimeUnit};

mod context;
pub use self::context::MeterContext;

mod error;
pub use self::error::MeterError;

pub mod filter;
pub use self::filter::{FilterReply, MeterFilter};

mod id;
pub use self::id::{Id, SharedString, Tag, Tags};

mod instrument;
pub use self::instrument::{
    Counter, CustomMeter, DistributionSummary, FunctionCounter, FunctionTimer, Gauge, LongTaskSample,
    LongTaskTimer, Measurement, Meter, Statistic, Timer, TimerSample, TimingScope,
};

mod kind;
pub use self::kind::{MeterKind, MeterKindMask};

mod registry;
pub use self::registry::MeterRegistry;

mod source;
pub use self::source::ValueSource;

pub use stepmeter_util::{
    Clock, DistributionConfig, Exemplar, ExemplarContext, ExemplarContextProvider, HistogramSnapshot, MockClock,
    SharedClock, SystemClock,
};
