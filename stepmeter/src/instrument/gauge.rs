use crate::{Id, MeterContext, ValueSource};

/// An instantaneous value read from a [`ValueSource`] whenever it is observed.
#[derive(Debug)]
pub struct Gauge {
    id: Id,
    created_millis: i64,
    source: Option<ValueSource>,
}

impl Gauge {
    /// Creates a new `Gauge` reading `source`.
    pub fn new(id: Id, source: ValueSource, context: &MeterContext) -> Self {
        Self { id, created_millis: context.now_millis(), source: Some(source) }
    }

    /// Creates a no-op `Gauge` which always reads `NaN`.
    pub fn noop(id: Id) -> Self {
        Self { id, created_millis: 0, source: None }
    }

    /// Identity of this gauge.
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Wall time this gauge was created at, in milliseconds since the Unix epoch.
    pub fn created_millis(&self) -> i64 {
        self.created_millis
    }

    /// Whether this gauge discards everything.
    pub fn is_noop(&self) -> bool {
        self.source.is_none()
    }

    /// Current value, or `NaN` if the source is gone.
    pub fn value(&self) -> f64 {
        self.source.as_ref().map_or(f64::NAN, ValueSource::value)
    }

    /// Current value, or `None` if the source is gone.
    pub fn sample(&self) -> Option<f64> {
        self.source.as_ref().and_then(ValueSource::sample)
    }
}
