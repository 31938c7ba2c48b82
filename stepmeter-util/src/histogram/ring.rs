use std::{
    cmp,
    sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering},
    time::Duration,
};

use crate::clock::{Clock, SharedClock};

use super::{HistogramConfigError, HistogramSlot, HistogramSnapshot, SlotLayout, WindowedHistogram};

/// A decaying histogram.
///
/// The expiry period is split across a ring of `buffer_length` slots, each covering
/// `expiry / buffer_length` of wall time. Writes go to the active slot only; once wall time passes
/// the active slot's end, the next slot in the ring is cleared and becomes active. A snapshot
/// merges every slot, so a sample stays visible for between `expiry - expiry / buffer_length` and
/// `expiry` after it was recorded, and memory never grows past `buffer_length` slots.
#[derive(Debug)]
pub struct TimeWindowHistogram {
    layout: SlotLayout,
    slots: Box<[HistogramSlot]>,
    rotation_millis: i64,
    index: AtomicUsize,
    next_rotation: AtomicI64,
    rotating: AtomicBool,
    clock: SharedClock,
}

impl TimeWindowHistogram {
    /// Creates a new `TimeWindowHistogram`.
    ///
    /// Fails if `buffer_length` is zero or `expiry / buffer_length` is shorter than a millisecond.
    pub fn new(
        layout: SlotLayout,
        expiry: Duration,
        buffer_length: usize,
        clock: SharedClock,
    ) -> Result<Self, HistogramConfigError> {
        if buffer_length == 0 {
            return Err(HistogramConfigError::ZeroBufferLength);
        }
        let rotation_millis = (expiry.as_millis() / buffer_length as u128) as i64;
        if rotation_millis == 0 {
            return Err(HistogramConfigError::EmptyRotationInterval { expiry, buffer_length });
        }

        let slots = (0..buffer_length).map(|_| layout.new_slot()).collect();
        let next_rotation = clock.wall_time_millis() + rotation_millis;

        Ok(Self {
            layout,
            slots,
            rotation_millis,
            index: AtomicUsize::new(0),
            next_rotation: AtomicI64::new(next_rotation),
            rotating: AtomicBool::new(false),
            clock,
        })
    }

    /// Advances the ring if wall time has passed the active slot's end, returning the index of
    /// the active slot.
    ///
    /// Exactly one caller performs a given rotation; callers that lose the race keep using the
    /// slot that is active right now, which is still live until the winner publishes the new
    /// index.
    fn rotate(&self) -> usize {
        let len = self.slots.len();
        let now = self.clock.wall_time_millis();
        if now < self.next_rotation.load(Ordering::Acquire)
            || self
                .rotating
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            return self.index.load(Ordering::Acquire) % len;
        }

        // Someone may have finished the same rotation between our check and our claim.
        let next_rotation = self.next_rotation.load(Ordering::Acquire);
        if now >= next_rotation {
            // Every full interval that elapsed retires one slot, but clearing more than the
            // whole ring is pointless.
            let elapsed = (now - next_rotation) / self.rotation_millis + 1;
            let depth = cmp::min(elapsed as usize, len);

            // Clear the slots we're about to hand to writers before pointing writers at them.
            let mut index = self.index.load(Ordering::Acquire);
            for step in 1..=depth {
                self.slots[(index + step) % len].reset();
            }
            index += depth;

            self.index.store(index, Ordering::Release);
            self.next_rotation.store(next_rotation + elapsed * self.rotation_millis, Ordering::Release);
        }

        self.rotating.store(false, Ordering::Release);
        self.index.load(Ordering::Acquire) % len
    }
}

impl WindowedHistogram for TimeWindowHistogram {
    fn record(&self, value: f64) {
        let index = self.rotate();
        self.layout.record(&self.slots[index], value);
    }

    fn snapshot(&self, count: u64, total: f64, max: f64) -> HistogramSnapshot {
        // Rotate first so the snapshot reflects time that passed since the last write.
        self.rotate();
        self.layout.snapshot(self.slots.iter(), count, total, max)
    }

    fn bucket_bounds(&self) -> &[f64] {
        self.layout.bounds()
    }

    fn slot_count(&self) -> usize {
        self.slots.len()
    }
}
