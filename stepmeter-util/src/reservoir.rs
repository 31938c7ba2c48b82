//! Exemplar reservoir.
use std::{
    cell::RefCell,
    fmt,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;

use crate::{
    clock::{Clock, SharedClock},
    step::StepBoundary,
};

thread_local! {
    static FAST_RNG: RefCell<Xoshiro256StarStar> =
        RefCell::new(Xoshiro256StarStar::from_rng(&mut rand::rng()));
}

fn fastrand(upper: u64) -> u64 {
    FAST_RNG.with(|rng| rng.borrow_mut().random_range(0..upper))
}

/// Trace correlation attached to a measurement.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExemplarContext {
    /// Trace identifier bytes.
    pub trace_id: Option<Vec<u8>>,
    /// Span identifier bytes.
    pub span_id: Option<Vec<u8>>,
    /// Extra attributes to carry with the exemplar.
    pub attributes: Vec<(String, String)>,
}

impl ExemplarContext {
    /// Builds a context from hex-encoded trace and span identifiers.
    ///
    /// An identifier that isn't valid hex is left unset.
    pub fn from_hex(trace_id: &str, span_id: &str) -> Self {
        Self {
            trace_id: hex::decode(trace_id).ok(),
            span_id: hex::decode(span_id).ok(),
            attributes: Vec::new(),
        }
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }
}

/// Supplies the trace context of the measurement being recorded, if there is one.
pub trait ExemplarContextProvider: Send + Sync {
    /// The current context, or `None` for untraced measurements.
    fn current_context(&self) -> Option<ExemplarContext>;
}

impl<F> ExemplarContextProvider for F
where
    F: Fn() -> Option<ExemplarContext> + Send + Sync,
{
    fn current_context(&self) -> Option<ExemplarContext> {
        self()
    }
}

/// A sampled measurement.
#[derive(Clone, Debug, PartialEq)]
pub struct Exemplar {
    /// Measured value, in the unit the instrument records in.
    pub value: f64,
    /// Wall time of the measurement, in nanoseconds since the Unix epoch.
    pub timestamp_nanos: i64,
    /// Trace identifier bytes.
    pub trace_id: Option<Vec<u8>>,
    /// Span identifier bytes.
    pub span_id: Option<Vec<u8>>,
    /// Attributes carried from the context.
    pub attributes: Vec<(String, String)>,
}

/// How a measurement picks its cell.
#[derive(Clone, Debug)]
pub enum CellSelector {
    /// Reservoir sampling over all cells.
    Random,
    /// One cell per histogram bucket; the latest measurement in a bucket wins.
    Buckets(Arc<[f64]>),
}

struct Cells {
    cells: Box<[Mutex<Option<Exemplar>>]>,
    seen: AtomicU64,
}

impl Cells {
    fn new(len: usize) -> Self {
        Self { cells: (0..len).map(|_| Mutex::new(None)).collect(), seen: AtomicU64::new(0) }
    }

    fn clear(&self) {
        for cell in self.cells.iter() {
            *cell.lock() = None;
        }
        self.seen.store(0, Ordering::Release);
    }
}

/// A fixed-capacity, step-partitioned exemplar sampler.
///
/// Untraced measurements are never sampled. Traced ones fill empty cells first, then replace
/// incumbents following Vitter's [Algorithm R][vitter_paper], so each retained exemplar is
/// roughly uniformly distributed over the step rather than biased to its end. Two sets of cells
/// alternate like the A/B halves of a sampling reservoir: one fills during the step in progress,
/// the other holds the step that closed last until the next rollover discards it.
///
/// [vitter_paper]: https://www.cs.umd.edu/~samir/498/vitter.pdf
pub struct ExemplarReservoir {
    provider: Arc<dyn ExemplarContextProvider>,
    selector: CellSelector,
    buffers: [Cells; 2],
    active: AtomicUsize,
    boundary: StepBoundary,
    clock: SharedClock,
}

impl ExemplarReservoir {
    /// Creates a new `ExemplarReservoir`.
    ///
    /// With [`CellSelector::Buckets`] there is one cell per bucket and `cell_count` is ignored.
    pub fn new(
        cell_count: usize,
        selector: CellSelector,
        step: Duration,
        provider: Arc<dyn ExemplarContextProvider>,
        clock: SharedClock,
    ) -> Self {
        let len = match &selector {
            CellSelector::Random => cell_count.max(1),
            CellSelector::Buckets(bounds) => bounds.len().max(1),
        };
        let boundary = StepBoundary::new(step, clock.wall_time_millis());
        Self {
            provider,
            selector,
            buffers: [Cells::new(len), Cells::new(len)],
            active: AtomicUsize::new(0),
            boundary,
            clock,
        }
    }

    /// Number of cells per step.
    pub fn cell_count(&self) -> usize {
        self.buffers[0].cells.len()
    }

    /// Offers a measurement. A no-op when no trace context is attached.
    pub fn sample(&self, value: f64) {
        let Some(context) = self.provider.current_context() else {
            return;
        };

        let now = self.clock.wall_time_millis();
        let cells = &self.buffers[self.rollover(now)];
        let Some(idx) = self.select(cells, value) else {
            return;
        };

        let exemplar = Exemplar {
            value,
            timestamp_nanos: now.saturating_mul(1_000_000),
            trace_id: context.trace_id,
            span_id: context.span_id,
            attributes: context.attributes,
        };

        // A contended cell is being written, collected or cleared; dropping this candidate is
        // fine because it was only ever a candidate.
        if let Some(mut cell) = cells.cells[idx].try_lock() {
            *cell = Some(exemplar);
        }
    }

    /// Exemplars of the last closed step. Does not change state.
    pub fn collect(&self) -> Vec<Exemplar> {
        let closed = &self.buffers[1 - self.rollover(self.clock.wall_time_millis())];
        closed.cells.iter().filter_map(|cell| cell.lock().clone()).collect()
    }

    /// Exemplars of the last closed step, leaving it empty.
    pub fn drain(&self) -> Vec<Exemplar> {
        let closed = &self.buffers[1 - self.rollover(self.clock.wall_time_millis())];
        closed.cells.iter().filter_map(|cell| cell.lock().take()).collect()
    }

    /// Closes the step in progress so its exemplars can be drained. No rollovers happen
    /// afterwards.
    pub fn close(&self) {
        self.boundary.close(|| self.swap(true));
    }

    fn rollover(&self, now: i64) -> usize {
        self.boundary.advance(now, |rollover| self.swap(rollover.is_contiguous()));
        self.active.load(Ordering::Acquire)
    }

    fn swap(&self, keep_closing: bool) {
        let closing = self.active.load(Ordering::Acquire);
        let opening = 1 - closing;
        self.buffers[opening].clear();
        self.active.store(opening, Ordering::Release);
        if !keep_closing {
            self.buffers[closing].clear();
        }
    }

    fn select(&self, cells: &Cells, value: f64) -> Option<usize> {
        let len = cells.cells.len();
        match &self.selector {
            CellSelector::Random => {
                let seen = cells.seen.fetch_add(1, Ordering::AcqRel);
                if seen < len as u64 {
                    return Some(seen as usize);
                }
                let candidate = fastrand(seen + 1);
                (candidate < len as u64).then_some(candidate as usize)
            }
            CellSelector::Buckets(bounds) => {
                let idx = bounds.partition_point(|bound| *bound < value);
                Some(idx.min(len - 1))
            }
        }
    }
}

impl fmt::Debug for ExemplarReservoir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExemplarReservoir")
            .field("selector", &self.selector)
            .field("cell_count", &self.cell_count())
            .field("boundary", &self.boundary)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{CellSelector, ExemplarContext, ExemplarContextProvider, ExemplarReservoir};
    use crate::clock::MockClock;
    use std::{
        collections::HashSet,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        time::Duration,
    };

    const STEP: Duration = Duration::from_secs(60);

    struct Toggle(AtomicBool);

    impl ExemplarContextProvider for Toggle {
        fn current_context(&self) -> Option<ExemplarContext> {
            self.0
                .load(Ordering::Relaxed)
                .then(|| ExemplarContext::from_hex("4bf92f3577b34da6a3ce929d0e0e4736", "00f067aa0ba902b7"))
        }
    }

    fn traced() -> Arc<dyn ExemplarContextProvider> {
        Arc::new(Toggle(AtomicBool::new(true)))
    }

    #[test]
    fn untraced_measurements_are_never_sampled() {
        let (mock, clock) = MockClock::shared();
        let provider: Arc<dyn ExemplarContextProvider> = Arc::new(Toggle(AtomicBool::new(false)));
        let reservoir = ExemplarReservoir::new(16, CellSelector::Random, STEP, provider, clock);

        for i in 0..1000 {
            reservoir.sample(f64::from(i));
        }
        mock.add(STEP);
        assert!(reservoir.collect().is_empty());
    }

    #[test]
    fn saturated_reservoir_is_bounded_and_distinct() {
        let (mock, clock) = MockClock::shared();
        let reservoir = ExemplarReservoir::new(16, CellSelector::Random, STEP, traced(), clock);

        for i in 0..1_000_000 {
            reservoir.sample(f64::from(i));
        }
        mock.add(STEP);

        let exemplars = reservoir.collect();
        assert_eq!(exemplars.len(), 16);
        let distinct: HashSet<u64> = exemplars.iter().map(|e| e.value.to_bits()).collect();
        assert_eq!(distinct.len(), 16);

        let first = &exemplars[0];
        assert_eq!(first.trace_id.as_deref().map(<[u8]>::len), Some(16));
        assert_eq!(first.span_id.as_deref().map(<[u8]>::len), Some(8));
        assert_eq!(first.timestamp_nanos, 0);
    }

    #[test]
    fn exemplars_surface_one_step_later_and_then_expire() {
        let (mock, clock) = MockClock::shared();
        let reservoir = ExemplarReservoir::new(4, CellSelector::Random, STEP, traced(), clock);

        reservoir.sample(1.0);
        reservoir.sample(2.0);
        assert!(reservoir.collect().is_empty());

        mock.add(STEP);
        assert_eq!(reservoir.collect().len(), 2);
        // Collecting doesn't consume.
        assert_eq!(reservoir.collect().len(), 2);

        mock.add(STEP);
        assert!(reservoir.collect().is_empty());
    }

    #[test]
    fn drain_hands_off_once() {
        let (mock, clock) = MockClock::shared();
        let reservoir = ExemplarReservoir::new(4, CellSelector::Random, STEP, traced(), clock);

        reservoir.sample(1.0);
        mock.add(STEP);
        assert_eq!(reservoir.drain().len(), 1);
        assert!(reservoir.drain().is_empty());
    }

    #[test]
    fn bucket_selector_keeps_latest_per_bucket() {
        let (mock, clock) = MockClock::shared();
        let bounds: Arc<[f64]> = vec![10.0, 100.0, f64::INFINITY].into();
        let reservoir = ExemplarReservoir::new(16, CellSelector::Buckets(bounds), STEP, traced(), clock);
        assert_eq!(reservoir.cell_count(), 3);

        reservoir.sample(5.0);
        reservoir.sample(7.0);
        reservoir.sample(500.0);
        mock.add(STEP);

        let values: Vec<f64> = reservoir.collect().iter().map(|e| e.value).collect();
        assert_eq!(values, vec![7.0, 500.0]);
    }

    #[test]
    fn close_exposes_the_step_in_progress() {
        let (_mock, clock) = MockClock::shared();
        let reservoir = ExemplarReservoir::new(4, CellSelector::Random, STEP, traced(), clock);
        reservoir.sample(3.0);
        reservoir.close();
        assert_eq!(reservoir.drain().len(), 1);
    }
}
