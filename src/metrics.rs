// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for migrations.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection. The
//! embedding process chooses the exporter; without one installed every call
//! here is a no-op.
//!
//! # Metric Naming Convention
//! - `redis_migrate_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `phase`: count, scan, export, import, delete
//! - `outcome`: succeeded, overwritten, failed
//! - `status`: success, error

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record keys that reached a final outcome
pub fn record_keys(outcome: &'static str, count: u64) {
    if count == 0 {
        return;
    }
    counter!("redis_migrate_keys_total", "outcome" => outcome).increment(count);
}

/// Record a finished batch, successful or not
pub fn record_batch(status: &'static str, keys: usize) {
    counter!("redis_migrate_batches_total", "status" => status).increment(1);
    histogram!("redis_migrate_batch_size").record(keys as f64);
}

/// Record a store operation's latency
pub fn record_latency(phase: &'static str, duration: Duration) {
    histogram!("redis_migrate_operation_seconds", "phase" => phase).record(duration.as_secs_f64());
}

/// Record an error with the phase that produced it
pub fn record_error(phase: &'static str) {
    counter!("redis_migrate_errors_total", "phase" => phase).increment(1);
}

/// Set the number of keys expected for the current run
pub fn set_total_keys(total: u64) {
    gauge!("redis_migrate_total_keys").set(total as f64);
}

/// Set the number of workers currently running
pub fn set_active_workers(count: usize) {
    gauge!("redis_migrate_active_workers").set(count as f64);
}

/// Record a whole run's duration
pub fn record_run(status: &'static str, duration: Duration) {
    counter!("redis_migrate_runs_total", "status" => status).increment(1);
    histogram!("redis_migrate_run_seconds").record(duration.as_secs_f64());
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    phase: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(phase: &'static str) -> Self {
        Self {
            phase,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.phase, self.start.elapsed());
    }
}
