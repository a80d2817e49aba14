//! Shared spin-then-wait primitive used by every background thread that
//! polls for progress (writer waiting on new reservations, a caller waiting
//! for `write_lsn`/`flushed_to_disk_lsn` to pass a target). Spins briefly
//! before parking on a condvar, trading a little CPU for much lower latency
//! on the common case where progress arrives within microseconds.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

pub struct WaitPoint {
    state: Mutex<u64>,
    condvar: Condvar,
}

impl Default for WaitPoint {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitPoint {
    pub fn new() -> Self {
        Self { state: Mutex::new(0), condvar: Condvar::new() }
    }

    /// Publish progress and wake anyone waiting on a value at or below it.
    pub fn advance(&self, value: u64) {
        let mut guard = self.state.lock().unwrap();
        if value > *guard {
            *guard = value;
            self.condvar.notify_all();
        }
    }

    pub fn current(&self) -> u64 {
        *self.state.lock().unwrap()
    }

    /// Block (spinning briefly, then parking) until `current() >= target` or
    /// `timeout` elapses. Returns the observed value.
    pub fn wait_at_least(&self, target: u64, spin_rounds: u32, timeout: Duration) -> u64 {
        for _ in 0..spin_rounds {
            let v = self.current();
            if v >= target {
                return v;
            }
            std::hint::spin_loop();
        }
        let deadline = Instant::now() + timeout;
        let mut guard = self.state.lock().unwrap();
        while *guard < target {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (next_guard, result) = self.condvar.wait_timeout(guard, deadline - now).unwrap();
            guard = next_guard;
            if result.timed_out() {
                break;
            }
        }
        *guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wait_returns_immediately_once_target_met() {
        let wp = WaitPoint::new();
        wp.advance(10);
        let observed = wp.wait_at_least(5, 4, Duration::from_millis(50));
        assert_eq!(observed, 10);
    }

    #[test]
    fn wait_wakes_on_advance_from_another_thread() {
        let wp = Arc::new(WaitPoint::new());
        let wp2 = wp.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            wp2.advance(42);
        });
        let observed = wp.wait_at_least(42, 4, Duration::from_secs(2));
        handle.join().unwrap();
        assert_eq!(observed, 42);
    }

    #[test]
    fn wait_times_out_if_target_never_met() {
        let wp = WaitPoint::new();
        let observed = wp.wait_at_least(100, 2, Duration::from_millis(20));
        assert!(observed < 100);
    }
}
