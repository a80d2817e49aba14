//! Out-of-order fill, in-order publish: `recent_written` and `recent_closed`
//! ring arrays let many mini-transactions copy their bytes into the shared
//! buffer concurrently while the writer/flusher only ever advance
//! `write_lsn`/`flushed_to_disk_lsn` past a *contiguous* prefix.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::consumer::Consumer;
use crate::lsn::sn_to_lsn;
use crate::types::{Lsn, Sn};

/// A power-of-two-sized ring of "this LSN range is done" markers. Each slot
/// holds the LSN just past the end of a completed range that starts inside
/// the slot, or 0 if nothing has completed there yet. Advancing the link
/// scans forward from the last known boundary while slots are non-zero.
pub struct CompletionRing {
    slots: Vec<AtomicU64>,
    mask: u64,
    slot_size: u64,
}

impl CompletionRing {
    pub fn new(capacity_slots: usize, slot_size: u64) -> Self {
        assert!(capacity_slots.is_power_of_two());
        let slots = (0..capacity_slots).map(|_| AtomicU64::new(0)).collect();
        Self { slots, mask: capacity_slots as u64 - 1, slot_size }
    }

    fn slot_index(&self, lsn: u64) -> usize {
        ((lsn / self.slot_size) & self.mask) as usize
    }

    /// Mark `[start, end)` complete. `start` must fall within a single slot
    /// region of size `slot_size`; the caller is responsible for splitting
    /// ranges at slot boundaries before calling this.
    pub fn mark_done(&self, start: u64, end: u64) {
        let idx = self.slot_index(start);
        self.slots[idx].store(end, Ordering::Release);
    }

    fn slot_value(&self, lsn: u64) -> u64 {
        self.slots[self.slot_index(lsn)].load(Ordering::Acquire)
    }

    /// Advance `from` as far as a contiguous run of completed slots allows,
    /// clearing each slot behind the new boundary so it can be reused.
    pub fn advance(&self, from: u64) -> u64 {
        let mut boundary = from;
        loop {
            let recorded = self.slot_value(boundary);
            if recorded <= boundary {
                break;
            }
            let idx = self.slot_index(boundary);
            self.slots[idx].store(0, Ordering::Release);
            boundary = recorded;
        }
        boundary
    }
}

/// Tracks which reserved mini-transaction groups have closed (finished
/// copying their bytes into the buffer), independent of the writer's own
/// `recent_written` ring, so the checkpointer can be told the oldest LSN
/// still open and never write a checkpoint past it — a group that reserved
/// space but hasn't closed yet has no durable bytes behind it to recover.
/// Registered with the engine's [`crate::consumer::ConsumerRegistry`] like
/// any other retention consumer.
pub struct OpenGroupTracker {
    ring: CompletionRing,
    floor: Mutex<Sn>,
}

impl OpenGroupTracker {
    pub fn new(capacity_slots: usize, slot_size: u64, start_sn: Sn) -> Self {
        Self { ring: CompletionRing::new(capacity_slots, slot_size), floor: Mutex::new(start_sn) }
    }

    pub fn mark_closed(&self, start: Sn, end: Sn) {
        self.ring.mark_done(start, end);
    }
}

impl Consumer for OpenGroupTracker {
    fn name(&self) -> &str {
        "recent_closed"
    }

    fn oldest_needed_lsn(&self) -> Lsn {
        let mut floor = self.floor.lock().unwrap();
        *floor = self.ring.advance(*floor);
        sn_to_lsn(*floor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_stalls_on_a_gap() {
        let ring = CompletionRing::new(4, 100);
        ring.mark_done(0, 100);
        ring.mark_done(200, 300);
        // slot for [100,200) never filled in; boundary stalls at 100.
        assert_eq!(ring.advance(0), 100);
    }

    #[test]
    fn advance_fills_gap_once_reported() {
        let ring = CompletionRing::new(4, 100);
        ring.mark_done(0, 100);
        ring.mark_done(100, 200);
        ring.mark_done(200, 300);
        assert_eq!(ring.advance(0), 300);
    }

    #[test]
    fn open_group_tracker_reports_oldest_unclosed_sn() {
        let tracker = OpenGroupTracker::new(4, 100, 0);
        assert_eq!(tracker.oldest_needed_lsn(), sn_to_lsn(0));
        tracker.mark_closed(0, 100);
        assert_eq!(tracker.oldest_needed_lsn(), sn_to_lsn(100));
        // a group still open past this point stalls the floor.
        tracker.mark_closed(200, 300);
        assert_eq!(tracker.oldest_needed_lsn(), sn_to_lsn(100));
        tracker.mark_closed(100, 200);
        assert_eq!(tracker.oldest_needed_lsn(), sn_to_lsn(300));
    }
}
