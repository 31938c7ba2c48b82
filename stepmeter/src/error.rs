use stepmeter_util::histogram::HistogramConfigError;
use thiserror::Error;

use crate::MeterKind;

/// Errors that could occur while configuring a registry or registering a meter.
#[derive(Debug, Error)]
pub enum MeterError {
    /// The identity is already registered with a different kind.
    #[error("meter `{id}` is already registered as a {existing}; it cannot also be registered as a {requested}")]
    KindConflict {
        /// Identity both registrations share.
        id: String,
        /// Kind of the registered meter.
        existing: MeterKind,
        /// Kind that was requested.
        requested: MeterKind,
    },

    /// A configuration value was explicitly supplied but could not be used.
    #[error("invalid value `{value}` for `{key}`: {reason}")]
    InvalidConfiguration {
        /// Configuration key.
        key: String,
        /// Value as supplied.
        value: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The distribution configuration a meter resolved to cannot back a histogram.
    #[error("invalid distribution configuration for meter `{id}`: {source}")]
    Histogram {
        /// Identity of the meter being registered.
        id: String,
        /// Underlying validation failure.
        #[source]
        source: HistogramConfigError,
    },
}
