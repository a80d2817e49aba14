//! Elastic capacity planning, grounded on `log0files_capacity.h`'s
//! `Log_files_capacity`: tracks physical vs. logical capacity, derives the
//! adaptive-flush and aggressive-checkpoint age thresholds, and drives
//! resize-down to completion.

use crate::constants::{
    ADAPTIVE_FLUSH_MAX_RATIO, ADAPTIVE_FLUSH_MIN_RATIO, AGGRESSIVE_CHECKPOINT_RATIO,
    CONCURRENCY_MARGIN_MAX_PCT, EXTRA_CONCURRENCY_MARGIN_PCT, EXTRA_WRITER_MARGIN_PCT,
    NEXT_FILE_EARLIER_MARGIN_PCT, N_FILES,
};
use crate::types::{Lsn, ResizeMode};

#[derive(Debug, Clone, Copy)]
pub struct CapacityLimits {
    /// Sum of the sizes of all files currently on disk.
    pub current_physical_capacity: u64,
    /// Physical capacity the file set is converging toward; equals
    /// `current_physical_capacity` unless a resize is in progress.
    pub target_physical_capacity: u64,
    /// Usable capacity before the writer must throttle new reservations.
    pub soft_logical_capacity: u64,
    /// Usable capacity before reservations are refused outright.
    pub hard_logical_capacity: u64,
    pub adaptive_flush_min_age: u64,
    pub adaptive_flush_max_age: u64,
    pub aggressive_checkpoint_min_age: u64,
    pub concurrency_margin: u64,
}

impl CapacityLimits {
    pub fn initialize(physical_capacity: u64, concurrent_mtrs: u64, avg_mtr_size: u64) -> Self {
        let mut limits = Self {
            current_physical_capacity: physical_capacity,
            target_physical_capacity: physical_capacity,
            soft_logical_capacity: 0,
            hard_logical_capacity: 0,
            adaptive_flush_min_age: 0,
            adaptive_flush_max_age: 0,
            aggressive_checkpoint_min_age: 0,
            concurrency_margin: 0,
        };
        limits.update(concurrent_mtrs, avg_mtr_size);
        limits
    }

    /// Recompute derived limits. Called whenever physical capacity changes
    /// (file added/removed) or the observed concurrency/mtr-size estimate
    /// moves.
    pub fn update(&mut self, concurrent_mtrs: u64, avg_mtr_size: u64) {
        let structural_cap =
            self.current_physical_capacity * (N_FILES as u64 - 2) / N_FILES as u64;
        let writer_margin = self.current_physical_capacity * EXTRA_WRITER_MARGIN_PCT / 100;
        self.hard_logical_capacity = structural_cap.saturating_sub(writer_margin);

        let concurrency_margin = (concurrent_mtrs * avg_mtr_size)
            .min(self.hard_logical_capacity * CONCURRENCY_MARGIN_MAX_PCT / 100);
        self.concurrency_margin = concurrency_margin;

        let extra_margin = self.hard_logical_capacity * EXTRA_CONCURRENCY_MARGIN_PCT / 100;
        self.soft_logical_capacity = self
            .hard_logical_capacity
            .saturating_sub(concurrency_margin)
            .saturating_sub(extra_margin);

        self.adaptive_flush_max_age = self.soft_logical_capacity;
        self.adaptive_flush_min_age = self.soft_logical_capacity / ADAPTIVE_FLUSH_MAX_RATIO
            * (ADAPTIVE_FLUSH_MAX_RATIO - ADAPTIVE_FLUSH_MIN_RATIO);
        self.aggressive_checkpoint_min_age =
            self.soft_logical_capacity - self.soft_logical_capacity / AGGRESSIVE_CHECKPOINT_RATIO;
    }

    pub fn is_resizing_down(&self) -> bool {
        self.target_physical_capacity < self.current_physical_capacity
    }

    pub fn resize_mode(&self) -> ResizeMode {
        if self.is_resizing_down() { ResizeMode::Down } else { ResizeMode::None }
    }

    pub fn begin_resize(&mut self, target: u64) {
        self.target_physical_capacity = target;
    }

    /// Account for a file being added or grown. While no resize-down is in
    /// progress, `target_physical_capacity` auto-tracks the new total so
    /// ordinary file-set growth is never mistaken for a shrink in progress.
    pub fn add_physical(&mut self, bytes: u64) {
        let auto_track = !self.is_resizing_down();
        self.current_physical_capacity += bytes;
        if auto_track {
            self.target_physical_capacity = self.current_physical_capacity;
        }
    }

    /// Account for a file being removed or shrunk. Mirrors [`Self::add_physical`]:
    /// outside of a resize-down, the target tracks the new total down too.
    pub fn remove_physical(&mut self, bytes: u64) {
        let auto_track = !self.is_resizing_down();
        self.current_physical_capacity = self.current_physical_capacity.saturating_sub(bytes);
        if auto_track {
            self.target_physical_capacity = self.current_physical_capacity;
        }
    }

    /// The planner's view of "is resize-down complete", combining the three
    /// criteria from the original: no file larger than `target/N_FILES`,
    /// the non-spare files' total physical size fitting in
    /// `(N_FILES-2)/N_FILES * target`, and the current logical size fitting
    /// in that same structural ceiling.
    pub fn resize_down_complete(
        &self,
        largest_file_size: u64,
        total_physical_non_spare: u64,
        current_logical_size: u64,
    ) -> bool {
        if !self.is_resizing_down() {
            return false;
        }
        let n = N_FILES as u64;
        let per_file_target = self.target_physical_capacity / n;
        let structural_target = self.target_physical_capacity * (n - 2) / n;
        largest_file_size <= per_file_target
            && total_physical_non_spare <= structural_target
            && current_logical_size <= structural_target
    }

    /// Size to use for the next file the governor creates.
    pub fn next_file_size(&self, default_file_size: u64) -> u64 {
        if self.is_resizing_down() {
            let remaining = self.current_physical_capacity.saturating_sub(self.target_physical_capacity);
            default_file_size.min(remaining.max(1))
        } else {
            default_file_size
        }
    }

    /// LSN margin ahead of `write_lsn` at which the governor should start
    /// preparing the next file, so it is ready before the current one fills.
    pub fn next_file_earlier_margin(&self, next_file_size: u64) -> u64 {
        next_file_size * NEXT_FILE_EARLIER_MARGIN_PCT / 100
    }

    pub fn checkpoint_age(&self, write_lsn: Lsn, checkpoint_lsn: Lsn) -> u64 {
        write_lsn.saturating_sub(checkpoint_lsn)
    }

    pub fn needs_aggressive_checkpoint(&self, write_lsn: Lsn, checkpoint_lsn: Lsn) -> bool {
        self.checkpoint_age(write_lsn, checkpoint_lsn) >= self.aggressive_checkpoint_min_age
    }

    pub fn adaptive_flush_pct(&self, write_lsn: Lsn, checkpoint_lsn: Lsn) -> u8 {
        let age = self.checkpoint_age(write_lsn, checkpoint_lsn);
        if age <= self.adaptive_flush_min_age {
            0
        } else if age >= self.adaptive_flush_max_age {
            100
        } else {
            let span = self.adaptive_flush_max_age - self.adaptive_flush_min_age;
            let progress = age - self.adaptive_flush_min_age;
            (progress * 100 / span.max(1)) as u8
        }
    }
}
