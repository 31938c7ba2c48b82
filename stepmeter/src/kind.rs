use std::{fmt, ops::BitOr};

/// Meter kind.
///
/// Defines the kind, or type, of a meter. Two registrations of the same identity must agree on
/// the kind.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum MeterKind {
    /// Monotonic count.
    Counter,
    /// Instantaneous value read from a source.
    Gauge,
    /// Durations of short events.
    Timer,
    /// Distribution of arbitrary magnitudes.
    DistributionSummary,
    /// Durations of tasks still in flight.
    LongTaskTimer,
    /// Monotonic count read from a source.
    FunctionCounter,
    /// Count and total time read from sources.
    FunctionTimer,
    /// Arbitrary set of measurements.
    Custom,
}

impl MeterKind {
    /// Lowercase, human readable name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            MeterKind::Counter => "counter",
            MeterKind::Gauge => "gauge",
            MeterKind::Timer => "timer",
            MeterKind::DistributionSummary => "distribution summary",
            MeterKind::LongTaskTimer => "long task timer",
            MeterKind::FunctionCounter => "function counter",
            MeterKind::FunctionTimer => "function timer",
            MeterKind::Custom => "custom meter",
        }
    }
}

impl fmt::Display for MeterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Meter kind mask.
///
/// Useful for matching against a kind, or kinds, of meters. Masks combine with `|`:
///
/// ```rust
/// # use stepmeter::{MeterKind, MeterKindMask};
/// let mask = MeterKindMask::COUNTER | MeterKindMask::TIMER;
///
/// assert!(mask.matches(MeterKind::Counter));
/// assert!(!mask.matches(MeterKind::Gauge));
/// assert!(MeterKindMask::ALL.matches(MeterKind::Custom));
/// assert!(!MeterKindMask::NONE.matches(MeterKind::Custom));
/// ```
#[derive(Debug, Eq, PartialEq, Hash, Clone, Copy, Ord, PartialOrd)]
pub struct MeterKindMask(u8);

impl MeterKindMask {
    /// No meter kinds.
    pub const NONE: MeterKindMask = MeterKindMask(0);

    /// The counter kind.
    pub const COUNTER: MeterKindMask = MeterKindMask(1);

    /// The gauge kind.
    pub const GAUGE: MeterKindMask = MeterKindMask(1 << 1);

    /// The timer kind.
    pub const TIMER: MeterKindMask = MeterKindMask(1 << 2);

    /// The distribution summary kind.
    pub const DISTRIBUTION_SUMMARY: MeterKindMask = MeterKindMask(1 << 3);

    /// The long task timer kind.
    pub const LONG_TASK_TIMER: MeterKindMask = MeterKindMask(1 << 4);

    /// The function counter kind.
    pub const FUNCTION_COUNTER: MeterKindMask = MeterKindMask(1 << 5);

    /// The function timer kind.
    pub const FUNCTION_TIMER: MeterKindMask = MeterKindMask(1 << 6);

    /// The custom kind.
    pub const CUSTOM: MeterKindMask = MeterKindMask(1 << 7);

    /// All meter kinds.
    pub const ALL: MeterKindMask = MeterKindMask(u8::MAX);

    fn of(kind: MeterKind) -> MeterKindMask {
        match kind {
            MeterKind::Counter => MeterKindMask::COUNTER,
            MeterKind::Gauge => MeterKindMask::GAUGE,
            MeterKind::Timer => MeterKindMask::TIMER,
            MeterKind::DistributionSummary => MeterKindMask::DISTRIBUTION_SUMMARY,
            MeterKind::LongTaskTimer => MeterKindMask::LONG_TASK_TIMER,
            MeterKind::FunctionCounter => MeterKindMask::FUNCTION_COUNTER,
            MeterKind::FunctionTimer => MeterKindMask::FUNCTION_TIMER,
            MeterKind::Custom => MeterKindMask::CUSTOM,
        }
    }

    /// Whether or not this mask contains the specified kind.
    pub fn matches(&self, kind: MeterKind) -> bool {
        self.0 & Self::of(kind).0 != 0
    }
}

impl From<MeterKind> for MeterKindMask {
    fn from(kind: MeterKind) -> Self {
        Self::of(kind)
    }
}

impl BitOr for MeterKindMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::{MeterKind, MeterKindMask};

    #[test]
    fn test_matching() {
        let tmask = MeterKindMask::TIMER | MeterKindMask::LONG_TASK_TIMER;

        assert!(tmask.matches(MeterKind::Timer));
        assert!(tmask.matches(MeterKind::LongTaskTimer));
        assert!(!tmask.matches(MeterKind::FunctionTimer));
        assert!(!tmask.matches(MeterKind::Counter));

        for kind in [MeterKind::Counter, MeterKind::Gauge, MeterKind::Custom] {
            assert!(MeterKindMask::ALL.matches(kind));
            assert!(!MeterKindMask::NONE.matches(kind));
            assert!(MeterKindMask::from(kind).matches(kind));
        }
    }
}
