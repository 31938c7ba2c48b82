use super::{Measurement, Statistic};
use crate::{Id, MeterContext, ValueSource};

/// An arbitrary set of measurements, each read from its own [`ValueSource`].
#[derive(Debug)]
pub struct CustomMeter {
    id: Id,
    created_millis: i64,
    measurements: Vec<(Statistic, ValueSource)>,
}

impl CustomMeter {
    /// Creates a new `CustomMeter`.
    pub fn new(id: Id, measurements: Vec<(Statistic, ValueSource)>, context: &MeterContext) -> Self {
        Self { id, created_millis: context.now_millis(), measurements }
    }

    /// Creates a no-op `CustomMeter` with no measurements.
    pub fn noop(id: Id) -> Self {
        Self { id, created_millis: 0, measurements: Vec::new() }
    }

    /// Identity of this meter.
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Wall time this meter was created at, in milliseconds since the Unix epoch.
    pub fn created_millis(&self) -> i64 {
        self.created_millis
    }

    /// Reads every measurement. Sources that are gone read `NaN`.
    pub fn measure(&self) -> Vec<Measurement> {
        self.measurements
            .iter()
            .map(|(statistic, source)| Measurement::new(*statistic, source.value()))
            .collect()
    }
}
