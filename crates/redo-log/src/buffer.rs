//! The shared log buffer: a fixed-size byte array mini-transactions copy
//! their encoded records into directly, addressed by SN so concurrent
//! writers never contend on a lock for the common case.
//!
//! `sn` is an atomic counter whose top bit (`SN_LOCKED_BIT`) pauses new
//! reservations during buffer-resize or shutdown; everything else is the
//! next SN to hand out. `write_lsn` is published separately by the writer
//! thread once bytes are written to the OS (not yet fsync'd).

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::constants::SN_LOCKED_BIT;
use crate::error::{LogError, Result};
use crate::types::{Lsn, Sn, SnRange};

/// A byte range reserved in the buffer for one mini-transaction group.
/// `bytes` is a raw pointer into the shared buffer valid for the reserving
/// thread's exclusive use until it calls [`LogBuffer::close`].
#[derive(Debug)]
pub struct Reservation {
    pub range: SnRange,
    ptr: *mut u8,
    len: usize,
}

// SAFETY: each reservation addresses a disjoint byte range of the buffer;
// the writer only reads a range once its slot in the completion ring
// reports it closed (see `completion.rs`).
unsafe impl Send for Reservation {}

impl Reservation {
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

pub struct LogBuffer {
    data: UnsafeCell<Vec<u8>>,
    capacity: usize,
    sn: AtomicU64,
    write_lsn: AtomicU64,
}

// SAFETY: `data` is only accessed through disjoint `Reservation` slices
// handed out by `reserve`, which never overlap while both are live.
unsafe impl Sync for LogBuffer {}

impl LogBuffer {
    pub fn new(capacity: usize, start_sn: Sn, start_lsn: Lsn) -> Self {
        Self {
            data: UnsafeCell::new(vec![0u8; capacity]),
            capacity,
            sn: AtomicU64::new(start_sn),
            write_lsn: AtomicU64::new(start_lsn),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn write_lsn(&self) -> Lsn {
        self.write_lsn.load(Ordering::Acquire)
    }

    pub fn advance_write_lsn(&self, new_value: Lsn) {
        self.write_lsn.fetch_max(new_value, Ordering::AcqRel);
    }

    pub fn lock_reservations(&self) {
        self.sn.fetch_or(SN_LOCKED_BIT, Ordering::AcqRel);
    }

    pub fn unlock_reservations(&self) {
        self.sn.fetch_and(!SN_LOCKED_BIT, Ordering::AcqRel);
    }

    /// Reserve `len` bytes starting at the next available SN. Fails if
    /// reservations are currently locked (init/shutdown/resize in
    /// progress) or if `len` exceeds the whole buffer's capacity (callers
    /// must split oversized records before reserving).
    pub fn reserve(&self, len: usize) -> Result<Reservation> {
        if len > self.capacity {
            return Err(LogError::OutOfSpace(format!(
                "record of {len} bytes exceeds buffer capacity {}", self.capacity
            )));
        }
        loop {
            let current = self.sn.load(Ordering::Acquire);
            if current & SN_LOCKED_BIT != 0 {
                return Err(LogError::DisabledRedo);
            }
            let start = current;
            let end = start + len as u64;
            if self
                .sn
                .compare_exchange_weak(current, end, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let offset = (start as usize) % self.capacity;
                // SAFETY: caller never reserves overlapping ranges since `sn`
                // only advances monotonically via this CAS loop, and the
                // buffer is sized so no in-flight reservation wraps twice.
                let base = unsafe { (*self.data.get()).as_mut_ptr() };
                let ptr = unsafe { base.add(offset) };
                return Ok(Reservation { range: SnRange { start, end }, ptr, len });
            }
        }
    }

    pub fn current_sn(&self) -> Sn {
        self.sn.load(Ordering::Acquire) & !SN_LOCKED_BIT
    }

    /// Copy out bytes in `[start, end)`, handling wraparound. Used by the
    /// writer thread once the completion ring reports the range closed.
    pub fn read_range(&self, start: Sn, end: Sn) -> Vec<u8> {
        let len = (end - start) as usize;
        let mut out = vec![0u8; len];
        let data = unsafe { &*self.data.get() };
        for i in 0..len {
            let offset = ((start as usize) + i) % self.capacity;
            out[i] = data[offset];
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservations_do_not_overlap() {
        let buf = LogBuffer::new(1024, 0, 8192);
        let mut r1 = buf.reserve(100).unwrap();
        let mut r2 = buf.reserve(100).unwrap();
        assert_eq!(r1.range.start, 0);
        assert_eq!(r2.range.start, 100);
        r1.as_mut_slice().fill(1);
        r2.as_mut_slice().fill(2);
        let bytes = buf.read_range(0, 200);
        assert!(bytes[..100].iter().all(|&b| b == 1));
        assert!(bytes[100..].iter().all(|&b| b == 2));
    }

    #[test]
    fn locked_buffer_refuses_reservations() {
        let buf = LogBuffer::new(1024, 0, 8192);
        buf.lock_reservations();
        assert!(buf.reserve(10).is_err());
        buf.unlock_reservations();
        assert!(buf.reserve(10).is_ok());
    }

    #[test]
    fn oversized_reservation_rejected() {
        let buf = LogBuffer::new(64, 0, 8192);
        assert!(buf.reserve(128).is_err());
    }
}
