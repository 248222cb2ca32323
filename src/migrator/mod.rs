// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Migration engine.
//!
//! The [`Migrator`] moves every key matching a pattern from one
//! [`KeyStore`] to another:
//!
//! ```text
//!                 count_keys ──► ProgressTracker::set_total
//!                      │
//!   producer: stream_keys ──► [batch queue, 2×workers] ──► worker 1..N
//!                                                             │
//!                         export_keys (source) ◄──────────────┤
//!                         import_keys (dest)   ◄──────────────┤
//!                         delete_keys (source, move mode) ◄───┘
//!                                                             │
//!              [error queue, N] ◄── any failure ──────────────┘
//!                      │
//!               drained into ErrorAccumulator ──► MigrationFailure
//! ```
//!
//! Per-batch failures never stop the run; only a scan failure or the
//! cancellation token stops new batches from being produced. The engine
//! imposes no timeouts of its own: a store call that hangs keeps its worker
//! busy until it returns, so wrap the store if you need deadlines.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use redis_migrate::{Migrator, MigrationConfig, ProgressTracker, RedisStore};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MigrationConfig {
//!     source_url: "redis://old-host:6379".into(),
//!     dest_url: "redis://new-host:6379".into(),
//!     pattern: "user:*".into(),
//!     ..Default::default()
//! };
//! config.validate()?;
//!
//! let source = Arc::new(RedisStore::connect(&config.source_url).await?);
//! let dest = Arc::new(RedisStore::connect(&config.dest_url).await?);
//! let progress = Arc::new(ProgressTracker::new());
//!
//! let migrator = Migrator::new(source, dest, config, progress.clone());
//! migrator.migrate(CancellationToken::new()).await?;
//! println!("migrated {} keys", progress.succeeded());
//! # Ok(())
//! # }
//! ```

mod types;

pub use types::{ErrorAccumulator, MigrationError, MigrationFailure, MigrationPhase};

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::{ConflictPolicy, MigrationConfig, MigrationMode};
use crate::metrics::{self, LatencyTimer};
use crate::progress::ProgressTracker;
use crate::storage::traits::KeyStore;

/// Moves keys between two stores with a fixed pool of workers.
pub struct Migrator {
    source: Arc<dyn KeyStore>,
    dest: Arc<dyn KeyStore>,
    config: MigrationConfig,
    progress: Arc<ProgressTracker>,
    errors: Arc<ErrorAccumulator>,
}

impl Migrator {
    /// Create a migrator. `config` is expected to have passed
    /// [`MigrationConfig::validate`] already.
    pub fn new(
        source: Arc<dyn KeyStore>,
        dest: Arc<dyn KeyStore>,
        config: MigrationConfig,
        progress: Arc<ProgressTracker>,
    ) -> Self {
        Self {
            source,
            dest,
            config,
            progress,
            errors: Arc::new(ErrorAccumulator::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// The tracker this migrator reports into, for display while running.
    #[must_use]
    pub fn progress(&self) -> Arc<ProgressTracker> {
        self.progress.clone()
    }

    /// Copy of every error recorded so far.
    #[must_use]
    pub fn errors(&self) -> Vec<MigrationError> {
        self.errors.snapshot()
    }

    /// Run the migration to completion.
    ///
    /// Returns every error encountered, joined, or `Ok(())` when the run
    /// was clean. Cancelling `cancel` stops the producer and idle workers;
    /// batches already in flight finish first.
    #[tracing::instrument(
        name = "migrate",
        skip_all,
        fields(
            pattern = %self.config.pattern,
            mode = %self.config.mode,
            conflict = %self.config.conflict,
        )
    )]
    pub async fn migrate(&self, cancel: CancellationToken) -> Result<(), MigrationFailure> {
        let started = Instant::now();

        let total = match self
            .source
            .count_keys(&self.config.pattern, self.config.batch_size)
            .await
        {
            Ok(total) => total,
            Err(e) => {
                error!(error = %e, "Failed to count keys");
                metrics::record_error(MigrationPhase::Count.as_str());
                self.errors.push(MigrationError::store(MigrationPhase::Count, e));
                return self.finish(started);
            }
        };

        self.progress.set_total(total);
        metrics::set_total_keys(total);

        if total == 0 {
            info!("No keys match the pattern, nothing to migrate");
            return self.finish(started);
        }

        let workers = self.config.concurrency.max(1);
        info!(total, workers, batch_size = self.config.batch_size, "Starting migration");

        let (batch_tx, batch_rx) = mpsc::channel::<Vec<String>>(workers * 2);
        let (error_tx, mut error_rx) = mpsc::channel::<MigrationError>(workers);
        let batch_rx = Arc::new(Mutex::new(batch_rx));

        let mut handles = Vec::with_capacity(workers + 1);
        for id in 0..workers {
            let worker = BatchWorker {
                id,
                source: self.source.clone(),
                dest: self.dest.clone(),
                mode: self.config.mode,
                conflict: self.config.conflict,
                progress: self.progress.clone(),
                batches: batch_rx.clone(),
                errors: error_tx.clone(),
                cancel: cancel.clone(),
            };
            handles.push(tokio::spawn(worker.run().instrument(info_span!("worker", id))));
        }
        metrics::set_active_workers(workers);

        handles.push(tokio::spawn(
            produce_batches(
                self.source.clone(),
                self.config.pattern.clone(),
                self.config.batch_size,
                batch_tx,
                error_tx,
                cancel.clone(),
            )
            .instrument(info_span!("producer")),
        ));

        // Closes once the producer and every worker have dropped their sender
        while let Some(err) = error_rx.recv().await {
            self.errors.push(err);
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Migration task did not finish cleanly");
                self.errors.push(MigrationError::Task(e.to_string()));
            }
        }
        metrics::set_active_workers(0);

        if cancel.is_cancelled() && !self.errors.contains_cancellation() {
            self.errors.push(MigrationError::Cancelled);
        }

        self.finish(started)
    }

    fn finish(&self, started: Instant) -> Result<(), MigrationFailure> {
        let elapsed = started.elapsed();
        let result = match MigrationFailure::from_errors(self.errors.snapshot()) {
            None => Ok(()),
            Some(failure) => Err(failure),
        };

        let status = if result.is_ok() { "success" } else { "error" };
        metrics::record_run(status, elapsed);
        info!(
            processed = self.progress.processed(),
            succeeded = self.progress.succeeded(),
            overwritten = self.progress.overwritten(),
            failed = self.progress.failed(),
            errors = result.as_ref().err().map_or(0, MigrationFailure::len),
            ?elapsed,
            "Migration finished"
        );
        result
    }
}

/// Stream key batches into the queue. Dropping `batches` on return is what
/// tells workers the scan is over.
async fn produce_batches(
    source: Arc<dyn KeyStore>,
    pattern: String,
    batch_size: usize,
    batches: mpsc::Sender<Vec<String>>,
    errors: mpsc::Sender<MigrationError>,
    cancel: CancellationToken,
) {
    match source.stream_keys(&pattern, batch_size, batches, cancel).await {
        Ok(()) => debug!("Scan complete"),
        Err(e) => {
            let err = MigrationError::store(MigrationPhase::Scan, e);
            if err.is_cancelled() {
                info!("Scan cancelled");
            } else {
                warn!(error = %err, "Scan failed, no further batches will be produced");
                metrics::record_error(MigrationPhase::Scan.as_str());
            }
            let _ = errors.send(err).await;
        }
    }
}

struct BatchWorker {
    id: usize,
    source: Arc<dyn KeyStore>,
    dest: Arc<dyn KeyStore>,
    mode: MigrationMode,
    conflict: ConflictPolicy,
    progress: Arc<ProgressTracker>,
    batches: Arc<Mutex<mpsc::Receiver<Vec<String>>>>,
    errors: mpsc::Sender<MigrationError>,
    cancel: CancellationToken,
}

impl BatchWorker {
    async fn run(self) {
        debug!(worker = self.id, "Worker started");
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                batch = async { self.batches.lock().await.recv().await } => batch,
            };
            let Some(keys) = next else { break };
            self.process_batch(keys).await;
        }
        debug!(worker = self.id, "Worker stopped");
    }

    /// Export, import, then delete from the source in move mode.
    async fn process_batch(&self, keys: Vec<String>) {
        let exported = {
            let _timer = LatencyTimer::new("export");
            self.source.export_keys(&keys).await
        };
        let entries = match exported {
            Ok(entries) => entries,
            Err(e) => {
                warn!(keys = keys.len(), error = %e, "Export failed, abandoning batch");
                self.fail_batch(keys.len() as u64);
                self.report(MigrationError::store(MigrationPhase::Export, e)).await;
                return;
            }
        };

        let imported = {
            let _timer = LatencyTimer::new("import");
            self.dest.import_keys(&entries, self.conflict).await
        };
        let written = match imported {
            Ok(written) => written,
            Err(e) => {
                warn!(keys = entries.len(), error = %e, "Import failed, abandoning batch");
                self.fail_batch(entries.len() as u64);
                self.report(MigrationError::store(MigrationPhase::Import, e)).await;
                return;
            }
        };

        self.reconcile(entries.len() as u64, written.len() as u64);

        if self.mode == MigrationMode::Move && !written.is_empty() {
            let _timer = LatencyTimer::new("delete");
            if let Err(e) = self.source.delete_keys(&written).await {
                // The destination copy stands; counts are not rolled back
                warn!(keys = written.len(), error = %e, "Failed to delete migrated keys from source");
                self.report(MigrationError::store(MigrationPhase::Delete, e)).await;
            }
        }

        debug!(
            requested = keys.len(),
            exported = entries.len(),
            written = written.len(),
            "Batch complete"
        );
    }

    /// Fold one imported batch into the counters.
    ///
    /// Keys left out by the `skip` policy land in `failed`, not `skipped`.
    fn reconcile(&self, exported: u64, written: u64) {
        self.progress.add_processed(exported);
        if self.conflict == ConflictPolicy::Overwrite {
            self.progress.add_overwritten(written);
            metrics::record_keys("overwritten", written);
        } else {
            self.progress.add_succeeded(written);
            metrics::record_keys("succeeded", written);
        }

        let failed = exported.saturating_sub(written);
        if failed > 0 {
            self.progress.add_failed(failed);
            metrics::record_keys("failed", failed);
        }
        metrics::record_batch("success", exported as usize);
    }

    fn fail_batch(&self, count: u64) {
        self.progress.add_processed(count);
        self.progress.add_failed(count);
        metrics::record_keys("failed", count);
        metrics::record_batch("error", count as usize);
    }

    async fn report(&self, err: MigrationError) {
        if let Some(phase) = err.phase() {
            metrics::record_error(phase.as_str());
        }
        if self.errors.send(err).await.is_err() {
            error!("Error queue closed, dropping migration error");
        }
    }
}
