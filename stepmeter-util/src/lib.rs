//! Building blocks for step-windowed metrics.
//!
//! This crate holds the lock-free pieces that instruments are assembled from:
//! - [`clock`]: wall and monotonic time behind a trait, with a mock for tests
//! - [`step`]: exactly-once rollover between fixed-length steps, and accumulators built on it
//! - [`histogram`]: decaying and step histograms with fixed-boundary and percentile slots
//! - [`reservoir`]: a bounded, step-partitioned exemplar sampler
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

pub mod clock;
pub use clock::{Clock, MockClock, SharedClock, SystemClock};

pub mod histogram;
pub use histogram::{DistributionConfig, HistogramSnapshot, WindowedHistogram};

pub mod reservoir;
pub use reservoir::{CellSelector, Exemplar, ExemplarContext, ExemplarContextProvider, ExemplarReservoir};

pub mod step;
pub use step::{DoubleMax, DoubleSum, LongSum, StepAccumulator, StepBoundary, StepWindow};
