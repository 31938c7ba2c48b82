use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use crate::{
    clock::{Clock, SharedClock},
    step::StepBoundary,
};

use super::{HistogramSlot, HistogramSnapshot, SlotLayout, WindowedHistogram};

/// A histogram over the last closed step.
///
/// Two slots alternate: one receives writes for the step in progress while the other holds the
/// step that closed last. Snapshots only ever read the closed slot, so every export sees a
/// complete step and consecutive exports never overlap.
#[derive(Debug)]
pub struct StepHistogram {
    layout: SlotLayout,
    slots: [HistogramSlot; 2],
    active: AtomicUsize,
    boundary: StepBoundary,
    clock: SharedClock,
}

impl StepHistogram {
    /// Creates a new `StepHistogram` rolling over every `step`.
    pub fn new(layout: SlotLayout, step: Duration, clock: SharedClock) -> Self {
        let boundary = StepBoundary::new(step, clock.wall_time_millis());
        let slots = [layout.new_slot(), layout.new_slot()];
        Self { layout, slots, active: AtomicUsize::new(0), boundary, clock }
    }

    fn rollover(&self) -> usize {
        let now = self.clock.wall_time_millis();
        self.boundary.advance(now, |rollover| {
            let closing = self.active.load(Ordering::Acquire);
            let opening = 1 - closing;
            self.slots[opening].reset();
            self.active.store(opening, Ordering::Release);
            if !rollover.is_contiguous() {
                // The closing slot belongs to a step that ended more than a step ago.
                self.slots[closing].reset();
            }
        });
        self.active.load(Ordering::Acquire)
    }
}

impl WindowedHistogram for StepHistogram {
    fn record(&self, value: f64) {
        let active = self.rollover();
        self.layout.record(&self.slots[active], value);
    }

    fn snapshot(&self, count: u64, total: f64, max: f64) -> HistogramSnapshot {
        let closed = 1 - self.rollover();
        self.layout.snapshot(std::iter::once(&self.slots[closed]), count, total, max)
    }

    fn bucket_bounds(&self) -> &[f64] {
        self.layout.bounds()
    }

    fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn close(&self) {
        self.boundary.close(|| {
            let closing = self.active.load(Ordering::Acquire);
            let opening = 1 - closing;
            self.slots[opening].reset();
            self.active.store(opening, Ordering::Release);
        });
    }
}
