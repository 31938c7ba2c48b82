//! Step-windowed accumulators.
//!
//! Time is cut into fixed-length steps. A [`StepWindow`] accumulates into the step in progress and
//! exposes the value of the last fully closed step. Moving from one step to the next (a rollover)
//! happens lazily on the first read or write that observes the boundary, or eagerly when a pump
//! calls [`StepWindow::rollover`]; either way it happens exactly once per boundary.
use std::{
    fmt,
    sync::atomic::{AtomicI64, AtomicU64, Ordering},
    time::Duration,
};

use crossbeam_utils::Backoff;
use portable_atomic::AtomicF64;

use crate::clock::{Clock, SharedClock};

const CLOSED: i64 = i64::MAX;

/// A rollover from one step to another.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rollover {
    /// Step index that was accumulating before the rollover.
    pub from: i64,
    /// Step index that is accumulating after the rollover.
    pub to: i64,
}

impl Rollover {
    /// Whether the step being closed is the one immediately before the new step.
    ///
    /// When it isn't, at least one whole step elapsed with no activity and the closed value
    /// belongs to a step that is already stale.
    pub fn is_contiguous(&self) -> bool {
        self.to == self.from + 1
    }
}

/// Tracks which step is in progress and hands out rollovers exactly once.
///
/// The thread that wins the claim for a new step runs the rollover; every other thread that
/// observes the same boundary spins until the winner has published it, so nobody reads a
/// half-rolled state.
#[derive(Debug)]
pub struct StepBoundary {
    step_millis: i64,
    claimed: AtomicI64,
    published: AtomicI64,
}

impl StepBoundary {
    /// Creates a new `StepBoundary` whose current step contains `now_millis`.
    pub fn new(step: Duration, now_millis: i64) -> Self {
        let step_millis = (step.as_millis() as i64).max(1);
        let current = now_millis / step_millis;
        Self { step_millis, claimed: AtomicI64::new(current), published: AtomicI64::new(current) }
    }

    /// Step length in milliseconds.
    pub fn step_millis(&self) -> i64 {
        self.step_millis
    }

    /// Index of the step currently accumulating.
    pub fn current_step(&self) -> i64 {
        self.published.load(Ordering::Acquire)
    }

    /// Wall time, in milliseconds, at which the step in progress started.
    pub fn window_start_millis(&self) -> i64 {
        self.current_step().saturating_mul(self.step_millis)
    }

    /// Whether a closing rollover has happened.
    pub fn is_closed(&self) -> bool {
        self.published.load(Ordering::Acquire) == CLOSED
    }

    /// Moves to the step containing `now_millis`, running `on_rollover` if this call won the
    /// transition.
    ///
    /// Returns `true` if `on_rollover` ran.
    pub fn advance<F>(&self, now_millis: i64, on_rollover: F) -> bool
    where
        F: FnOnce(Rollover),
    {
        let step = now_millis / self.step_millis;
        let claimed = self.claimed.load(Ordering::Acquire);
        if claimed < step
            && self
                .claimed
                .compare_exchange(claimed, step, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            on_rollover(Rollover { from: claimed, to: step });
            self.published.store(step, Ordering::Release);
            return true;
        }

        // Another thread may be between its claim and its publish.
        let backoff = Backoff::new();
        while self.published.load(Ordering::Acquire) < self.claimed.load(Ordering::Acquire).min(step)
        {
            backoff.snooze();
        }
        false
    }

    /// Performs a final rollover regardless of time, after which no further rollovers happen.
    ///
    /// Returns `true` if `on_close` ran; closing twice is a no-op.
    pub fn close<F>(&self, on_close: F) -> bool
    where
        F: FnOnce(),
    {
        let claimed = self.claimed.swap(CLOSED, Ordering::AcqRel);
        if claimed == CLOSED {
            return false;
        }

        // Let any rollover that was claimed before us finish publishing.
        let backoff = Backoff::new();
        while self.published.load(Ordering::Acquire) < claimed {
            backoff.snooze();
        }
        on_close();
        self.published.store(CLOSED, Ordering::Release);
        true
    }
}

/// A value that can be accumulated within a step and moved out at rollover.
pub trait StepAccumulator: Send + Sync {
    /// The accumulated value.
    type Value: Copy + PartialEq + fmt::Debug + Send + Sync;

    /// The value of a step with no activity.
    fn identity() -> Self::Value;

    /// Creates an accumulator holding `value`.
    fn with_value(value: Self::Value) -> Self;

    /// Merges `value` into the accumulator.
    fn record(&self, value: Self::Value);

    /// Reads the accumulated value.
    fn load(&self) -> Self::Value;

    /// Overwrites the accumulated value.
    fn store(&self, value: Self::Value);

    /// Reads the accumulated value and resets the accumulator to the identity.
    fn take(&self) -> Self::Value;
}

/// An integer sum.
#[derive(Debug, Default)]
pub struct LongSum(AtomicU64);

impl StepAccumulator for LongSum {
    type Value = u64;

    fn identity() -> u64 {
        0
    }

    fn with_value(value: u64) -> Self {
        Self(AtomicU64::new(value))
    }

    fn record(&self, value: u64) {
        self.0.fetch_add(value, Ordering::AcqRel);
    }

    fn load(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    fn store(&self, value: u64) {
        self.0.store(value, Ordering::Release);
    }

    fn take(&self) -> u64 {
        self.0.swap(0, Ordering::AcqRel)
    }
}

/// A floating-point sum.
#[derive(Debug, Default)]
pub struct DoubleSum(AtomicF64);

impl StepAccumulator for DoubleSum {
    type Value = f64;

    fn identity() -> f64 {
        0.0
    }

    fn with_value(value: f64) -> Self {
        Self(AtomicF64::new(value))
    }

    fn record(&self, value: f64) {
        self.0.fetch_add(value, Ordering::AcqRel);
    }

    fn load(&self) -> f64 {
        self.0.load(Ordering::Acquire)
    }

    fn store(&self, value: f64) {
        self.0.store(value, Ordering::Release);
    }

    fn take(&self) -> f64 {
        self.0.swap(0.0, Ordering::AcqRel)
    }
}

/// A floating-point maximum. Decays to zero after a step with no activity.
#[derive(Debug, Default)]
pub struct DoubleMax(AtomicF64);

impl StepAccumulator for DoubleMax {
    type Value = f64;

    fn identity() -> f64 {
        0.0
    }

    fn with_value(value: f64) -> Self {
        Self(AtomicF64::new(value))
    }

    fn record(&self, value: f64) {
        self.0.fetch_max(value, Ordering::AcqRel);
    }

    fn load(&self) -> f64 {
        self.0.load(Ordering::Acquire)
    }

    fn store(&self, value: f64) {
        self.0.store(value, Ordering::Release);
    }

    fn take(&self) -> f64 {
        self.0.swap(0.0, Ordering::AcqRel)
    }
}

// Pairs roll over together, which is how a count and a total stay in the same step.
impl<A: StepAccumulator, B: StepAccumulator> StepAccumulator for (A, B) {
    type Value = (A::Value, B::Value);

    fn identity() -> Self::Value {
        (A::identity(), B::identity())
    }

    fn with_value(value: Self::Value) -> Self {
        (A::with_value(value.0), B::with_value(value.1))
    }

    fn record(&self, value: Self::Value) {
        self.0.record(value.0);
        self.1.record(value.1);
    }

    fn load(&self) -> Self::Value {
        (self.0.load(), self.1.load())
    }

    fn store(&self, value: Self::Value) {
        self.0.store(value.0);
        self.1.store(value.1);
    }

    fn take(&self) -> Self::Value {
        (self.0.take(), self.1.take())
    }
}

/// A rolling accumulator exposing the in-progress step and the last closed step.
pub struct StepWindow<A: StepAccumulator> {
    clock: SharedClock,
    boundary: StepBoundary,
    current: A,
    previous: A,
}

impl<A: StepAccumulator> StepWindow<A> {
    /// Creates a new `StepWindow` whose first step contains the clock's current time.
    pub fn new(clock: SharedClock, step: Duration) -> Self {
        let boundary = StepBoundary::new(step, clock.wall_time_millis());
        Self {
            clock,
            boundary,
            current: A::with_value(A::identity()),
            previous: A::with_value(A::identity()),
        }
    }

    /// Merges `value` into the step in progress.
    pub fn record(&self, value: A::Value) {
        self.rollover();
        self.current.record(value);
    }

    /// Value accrued in the most recently closed step.
    ///
    /// A closed step with no activity reads as the identity, never as an older value.
    pub fn poll(&self) -> A::Value {
        self.rollover();
        self.previous.load()
    }

    /// Like [`poll`](Self::poll), but lets the caller fold a final contribution into the step in
    /// progress right before it is closed.
    ///
    /// Function-backed instruments use this to sample their source at the boundary.
    pub fn poll_with<F>(&self, before_close: F) -> A::Value
    where
        F: FnOnce(&A),
    {
        let now = self.clock.wall_time_millis();
        self.boundary.advance(now, |rollover| {
            before_close(&self.current);
            self.close_step(rollover);
        });
        self.previous.load()
    }

    /// Value accrued so far in the step in progress.
    pub fn current(&self) -> A::Value {
        self.rollover();
        self.current.load()
    }

    /// Rolls over if the clock has crossed a step boundary. Idempotent within a step.
    pub fn rollover(&self) {
        let now = self.clock.wall_time_millis();
        self.boundary.advance(now, |rollover| self.close_step(rollover));
    }

    /// Closes the step in progress immediately, making it readable through
    /// [`poll`](Self::poll). No rollovers happen afterwards.
    pub fn close(&self) {
        self.boundary.close(|| self.previous.store(self.current.take()));
    }

    /// Boundary bookkeeping for this window.
    pub fn boundary(&self) -> &StepBoundary {
        &self.boundary
    }

    fn close_step(&self, rollover: Rollover) {
        let value = self.current.take();
        let closed = if rollover.is_contiguous() { value } else { A::identity() };
        self.previous.store(closed);
    }
}

impl<A: StepAccumulator> fmt::Debug for StepWindow<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepWindow")
            .field("boundary", &self.boundary)
            .field("current", &self.current.load())
            .field("previous", &self.previous.load())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{DoubleMax, DoubleSum, LongSum, StepAccumulator, StepBoundary, StepWindow};
    use crate::clock::MockClock;
    use crossbeam_utils::thread;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    const STEP: Duration = Duration::from_secs(60);

    #[test]
    fn closed_step_value_is_isolated() {
        let (mock, clock) = MockClock::shared();
        let window = StepWindow::<DoubleSum>::new(clock, STEP);

        window.record(1.0);
        window.record(1.0);
        assert_eq!(window.poll(), 0.0);
        assert_eq!(window.current(), 2.0);

        mock.add(STEP);
        assert_eq!(window.poll(), 2.0);
        assert_eq!(window.current(), 0.0);

        mock.add(STEP);
        assert_eq!(window.poll(), 0.0);
    }

    #[test]
    fn skipped_steps_reset_to_identity() {
        let (mock, clock) = MockClock::shared();
        let window = StepWindow::<LongSum>::new(clock, STEP);

        window.record(5);
        mock.add(STEP * 3);
        assert_eq!(window.poll(), 0);
    }

    #[test]
    fn max_decays_after_idle_step() {
        let (mock, clock) = MockClock::shared();
        let window = StepWindow::<DoubleMax>::new(clock, STEP);

        window.record(3.0);
        window.record(11.0);
        window.record(7.0);
        assert_eq!(window.current(), 11.0);

        mock.add(STEP);
        assert_eq!(window.poll(), 11.0);
        mock.add(STEP);
        assert_eq!(window.poll(), 0.0);
    }

    #[test]
    fn repeated_polls_within_a_step_are_stable() {
        let (mock, clock) = MockClock::shared();
        let window = StepWindow::<(LongSum, DoubleSum)>::new(clock, STEP);

        window.record((3, 198.0));
        mock.add(STEP + Duration::from_secs(1));
        let first = window.poll();
        mock.add(Duration::from_secs(30));
        let second = window.poll();
        assert_eq!(first, (3, 198.0));
        assert_eq!(first, second);
    }

    #[test]
    fn poll_with_folds_before_close() {
        let (mock, clock) = MockClock::shared();
        let window = StepWindow::<DoubleSum>::new(clock, STEP);

        assert_eq!(window.poll_with(|current| current.record(10.0)), 0.0);
        mock.add(STEP);
        assert_eq!(window.poll_with(|current| current.record(4.0)), 4.0);
    }

    #[test]
    fn close_makes_partial_step_readable() {
        let (mock, clock) = MockClock::shared();
        let window = StepWindow::<DoubleSum>::new(clock, STEP);

        window.record(2.5);
        window.close();
        assert_eq!(window.poll(), 2.5);

        // No more rollovers after close.
        mock.add(STEP * 2);
        window.record(1.0);
        assert_eq!(window.poll(), 2.5);
        assert!(window.boundary().is_closed());
    }

    #[test]
    fn boundary_rolls_over_exactly_once_under_contention() {
        let boundary = StepBoundary::new(STEP, 0);
        let rollovers = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|_| {
                    for _ in 0..1000 {
                        boundary.advance(61_000, |_| {
                            rollovers.fetch_add(1, Ordering::SeqCst);
                        });
                    }
                });
            }
        })
        .unwrap();

        assert_eq!(rollovers.load(Ordering::SeqCst), 1);
        assert_eq!(boundary.current_step(), 1);
        assert_eq!(boundary.window_start_millis(), 60_000);
    }

}
