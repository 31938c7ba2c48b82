//! Time sources.
//!
//! Every time-dependent component takes a [`SharedClock`] so that tests can substitute a
//! [`MockClock`] and drive windows, rotations and timestamps deterministically.
use std::{
    fmt,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// A source of wall-clock and monotonic time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Milliseconds since the Unix epoch.
    fn wall_time_millis(&self) -> i64;

    /// Nanoseconds from an arbitrary, fixed origin. Only differences are meaningful.
    fn monotonic_time_nanos(&self) -> i64;
}

/// A clock shared between a registry and everything it creates.
pub type SharedClock = Arc<dyn Clock>;

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn wall_time_millis(&self) -> i64 {
        (**self).wall_time_millis()
    }

    fn monotonic_time_nanos(&self) -> i64 {
        (**self).monotonic_time_nanos()
    }
}

/// The system clock.
///
/// Wall time comes from [`SystemTime`]; monotonic time is measured with [`quanta`], which reads the
/// TSC where it is available and is cheap enough to call on every timer sample.
#[derive(Debug, Clone)]
pub struct SystemClock {
    clock: quanta::Clock,
    origin: quanta::Instant,
}

impl SystemClock {
    /// Creates a new `SystemClock`.
    pub fn new() -> Self {
        let clock = quanta::Clock::new();
        let origin = clock.now();
        Self { clock, origin }
    }

    /// Creates a new `SystemClock` behind a [`SharedClock`].
    pub fn shared() -> SharedClock {
        Arc::new(Self::new())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn wall_time_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default()
    }

    fn monotonic_time_nanos(&self) -> i64 {
        self.clock.now().duration_since(self.origin).as_nanos() as i64
    }
}

/// A manually advanced clock.
///
/// Both wall and monotonic time start at zero and only move when told to.
#[derive(Debug, Default)]
pub struct MockClock {
    wall_millis: AtomicI64,
    monotonic_nanos: AtomicI64,
}

impl MockClock {
    /// Creates a new `MockClock` with both time sources at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new `MockClock`, returning it along with a [`SharedClock`] view of it.
    pub fn shared() -> (Arc<MockClock>, SharedClock) {
        let mock = Arc::new(Self::new());
        let shared: SharedClock = mock.clone();
        (mock, shared)
    }

    /// Advances both time sources by `amount`.
    pub fn add(&self, amount: Duration) {
        self.wall_millis.fetch_add(amount.as_millis() as i64, Ordering::AcqRel);
        self.monotonic_nanos.fetch_add(amount.as_nanos() as i64, Ordering::AcqRel);
    }

    /// Advances both time sources by `secs` seconds.
    pub fn add_seconds(&self, secs: u64) {
        self.add(Duration::from_secs(secs));
    }

    /// Sets wall time, leaving monotonic time untouched.
    pub fn set_wall_time_millis(&self, millis: i64) {
        self.wall_millis.store(millis, Ordering::Release);
    }
}

impl Clock for MockClock {
    fn wall_time_millis(&self) -> i64 {
        self.wall_millis.load(Ordering::Acquire)
    }

    fn monotonic_time_nanos(&self) -> i64 {
        self.monotonic_nanos.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::{Clock, MockClock, SystemClock};
    use std::time::Duration;

    #[test]
    fn mock_clock_moves_only_when_told() {
        let clock = MockClock::new();
        assert_eq!(clock.wall_time_millis(), 0);
        assert_eq!(clock.monotonic_time_nanos(), 0);

        clock.add(Duration::from_millis(1500));
        assert_eq!(clock.wall_time_millis(), 1500);
        assert_eq!(clock.monotonic_time_nanos(), 1_500_000_000);

        clock.set_wall_time_millis(10);
        assert_eq!(clock.wall_time_millis(), 10);
        assert_eq!(clock.monotonic_time_nanos(), 1_500_000_000);
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.monotonic_time_nanos();
        let b = clock.monotonic_time_nanos();
        assert!(b >= a);
        assert!(clock.wall_time_millis() > 0);
    }
}
