//! Exports a [`stepmeter`] registry as OTLP-shaped metric batches.
//!
//! # Usage
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use stepmeter::MeterRegistry;
//! # use stepmeter_exporter_otlp::{LoggingSink, OtlpConfig, OtlpExporter};
//! // Read `otlp.*` properties from the environment, with the usual `OTEL_*` fallbacks.
//! let config = OtlpConfig::from_env("otlp").expect("valid exporter configuration");
//!
//! // The registry must share the exporter's step and temporality.
//! let registry = Arc::new(MeterRegistry::new(config.registry_config(None)));
//!
//! // Publish one millisecond after every step boundary until the handle is dropped.
//! let handle = OtlpExporter::new(config, Arc::clone(&registry), LoggingSink::new())
//!     .spawn()
//!     .expect("failed to start exporter");
//! # drop(handle);
//! ```
//!
//! # Conversion
//!
//! | meter | metric |
//! |---|---|
//! | counter, function counter | monotonic sum |
//! | gauge | gauge |
//! | timer, distribution summary, long task timer | summary when percentiles are published, histogram when buckets are published or neither is |
//! | function timer | histogram with count and sum only |
//! | custom meter | gauge, one point per measurement with a `statistic` attribute |
//!
//! Durations are exported in the configured base time unit. Under cumulative temporality a point
//! covers the meter's lifetime up to now; under delta temporality it covers the most recently
//! closed step, and the steps of consecutive exports are contiguous.
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod config;
pub use self::config::{ConfigError, OtlpConfig};

mod converter;
pub use self::converter::{convert, MetricConverter};

pub mod data;
pub use self::data::{ExportBatch, MetricData, MetricGroup};

mod exporter;
pub use self::exporter::{BuildError, ExporterHandle, OtlpExporter};

mod sink;
pub use self::sink::{ExportError, LoggingSink, MetricSink};
