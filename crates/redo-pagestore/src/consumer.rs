//! Registers the page store with the log engine's retention mechanism: as
//! long as a page's pre-image is only recoverable by replaying redo from
//! some LSN, the engine must not recycle files before that LSN.

use std::sync::atomic::{AtomicU64, Ordering};

use redo_log::consumer::Consumer;
use redo_log::types::Lsn;

/// Tracks the oldest LSN any dirty (not yet checkpointed to its page image)
/// page still depends on. `redo-compute` calls [`DirtyPageTracker::mark_dirty`]
/// the first time a page is touched in a mini-transaction group and
/// [`DirtyPageTracker::mark_clean`] once that page's image has been
/// persisted durably, e.g. by a background page flush.
pub struct DirtyPageTracker {
    oldest_dirty_lsn: AtomicU64,
}

impl DirtyPageTracker {
    pub fn new() -> Self {
        Self { oldest_dirty_lsn: AtomicU64::new(0) }
    }

    /// Record that a page became dirty at `lsn`, if nothing older is
    /// already tracked (first-dirty LSN only ever moves backward... in
    /// practice it never needs to, since pages are cleaned oldest first).
    pub fn mark_dirty(&self, lsn: Lsn) {
        let mut current = self.oldest_dirty_lsn.load(Ordering::Acquire);
        loop {
            if current != 0 && current <= lsn {
                return;
            }
            match self.oldest_dirty_lsn.compare_exchange_weak(
                current,
                lsn,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn mark_clean_up_to(&self, lsn: Lsn) {
        self.oldest_dirty_lsn.fetch_max(lsn, Ordering::AcqRel);
    }
}

impl Default for DirtyPageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Consumer for DirtyPageTracker {
    fn name(&self) -> &str {
        "page-cache"
    }

    fn oldest_needed_lsn(&self) -> Lsn {
        self.oldest_dirty_lsn.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_dirty_lsn_only_moves_up_once_cleaned() {
        let tracker = DirtyPageTracker::new();
        tracker.mark_dirty(100);
        tracker.mark_dirty(50);
        assert_eq!(tracker.oldest_needed_lsn(), 50);
        tracker.mark_clean_up_to(200);
        assert_eq!(tracker.oldest_needed_lsn(), 200);
    }
}
