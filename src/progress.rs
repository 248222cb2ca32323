// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Live progress counters for a migration.
//!
//! A single [`ProgressTracker`] is shared (behind an `Arc`) by the producer,
//! every worker and whatever renders progress. All counters are atomics, so
//! any number of tasks may update or read them without extra locking.
//!
//! # Example
//!
//! ```
//! use redis_migrate::ProgressTracker;
//!
//! let progress = ProgressTracker::new();
//! progress.set_total(100);
//! progress.add_processed(50);
//! progress.add_succeeded(50);
//!
//! assert_eq!(progress.completion_ratio(), 0.5);
//! assert_eq!(progress.success_ratio(), 1.0);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use serde::Serialize;

#[derive(Debug)]
pub struct ProgressTracker {
    total: AtomicU64,
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    /// Keys skipped because they already existed at the destination
    skipped: AtomicU64,
    overwritten: AtomicU64,
    started_at: Instant,
}

/// Point-in-time copy of every counter and derived figure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub total: u64,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub overwritten: u64,
    pub completion_ratio: f64,
    pub keys_per_second: f64,
    pub elapsed_secs: f64,
    pub eta_secs: f64,
    pub success_ratio: f64,
    pub failure_ratio: f64,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::started_at(Instant::now())
    }

    /// Create a tracker whose clock started at `started_at`.
    #[must_use]
    pub fn started_at(started_at: Instant) -> Self {
        Self {
            total: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            overwritten: AtomicU64::new(0),
            started_at,
        }
    }

    /// Set the expected number of keys. Meant to be called once, before any
    /// worker runs; a later call simply replaces the value.
    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    pub fn add_processed(&self, count: u64) {
        self.processed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_succeeded(&self, count: u64) {
        self.succeeded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_failed(&self, count: u64) {
        self.failed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_skipped(&self, count: u64) {
        self.skipped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_overwritten(&self, count: u64) {
        self.overwritten.fetch_add(count, Ordering::Relaxed);
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn overwritten(&self) -> u64 {
        self.overwritten.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn start_time(&self) -> Instant {
        self.started_at
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// processed / total. Not clamped: a value above 1.0 means more keys
    /// were processed than counted up front.
    #[must_use]
    pub fn completion_ratio(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.processed() as f64 / total as f64
    }

    /// Keys processed per second since the tracker started.
    #[must_use]
    pub fn keys_per_second(&self) -> f64 {
        rate(self.processed(), self.elapsed())
    }

    /// Estimated time until `processed` reaches `total` at the current rate.
    #[must_use]
    pub fn eta(&self) -> Duration {
        eta(self.total(), self.processed(), self.keys_per_second())
    }

    #[must_use]
    pub fn success_ratio(&self) -> f64 {
        ratio(self.succeeded(), self.processed())
    }

    #[must_use]
    pub fn failure_ratio(&self) -> f64 {
        ratio(self.failed(), self.processed())
    }

    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        let total = self.total();
        let processed = self.processed();
        let elapsed = self.elapsed();
        let keys_per_second = rate(processed, elapsed);
        let succeeded = self.succeeded();
        let failed = self.failed();

        ProgressSnapshot {
            total,
            processed,
            succeeded,
            failed,
            skipped: self.skipped(),
            overwritten: self.overwritten(),
            completion_ratio: if total == 0 { 0.0 } else { processed as f64 / total as f64 },
            keys_per_second,
            elapsed_secs: elapsed.as_secs_f64(),
            eta_secs: eta(total, processed, keys_per_second).as_secs_f64(),
            success_ratio: ratio(succeeded, processed),
            failure_ratio: ratio(failed, processed),
        }
    }
}

fn rate(processed: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs == 0.0 {
        return 0.0;
    }
    processed as f64 / secs
}

fn eta(total: u64, processed: u64, rate: f64) -> Duration {
    if rate == 0.0 || total == 0 || processed >= total {
        return Duration::ZERO;
    }
    Duration::from_secs_f64((total - processed) as f64 / rate)
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    part as f64 / whole as f64
}
