//! Edge-triggered wake-up point for the writer/flusher pipeline: bundles the
//! two [`WaitPoint`]s callers actually block on (write progress, flush
//! progress) behind one handle so `engine.rs` only needs to pass one thing
//! around.

use std::time::Duration;

use crate::types::Lsn;
use crate::wait::WaitPoint;

pub struct Notifier {
    written: WaitPoint,
    flushed: WaitPoint,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        Self { written: WaitPoint::new(), flushed: WaitPoint::new() }
    }

    pub fn publish_written(&self, lsn: Lsn) {
        self.written.advance(lsn);
    }

    pub fn publish_flushed(&self, lsn: Lsn) {
        self.flushed.advance(lsn);
    }

    pub fn written_lsn(&self) -> Lsn {
        self.written.current()
    }

    pub fn flushed_lsn(&self) -> Lsn {
        self.flushed.current()
    }

    pub fn wait_written_at_least(&self, target: Lsn, spin_rounds: u32, timeout: Duration) -> Lsn {
        self.written.wait_at_least(target, spin_rounds, timeout)
    }

    pub fn wait_flushed_at_least(&self, target: Lsn, spin_rounds: u32, timeout: Duration) -> Lsn {
        self.flushed.wait_at_least(target, spin_rounds, timeout)
    }
}
