// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the migrator.

use std::fmt;
use parking_lot::Mutex;
use thiserror::Error;
use crate::storage::traits::StoreError;

/// The step of a migration that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationPhase {
    /// Counting matching keys on the source
    Count,
    /// Streaming key batches from the source
    Scan,
    /// Serializing keys on the source
    Export,
    /// Writing keys to the destination
    Import,
    /// Removing migrated keys from the source (move mode)
    Delete,
}

impl MigrationPhase {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Scan => "scan",
            Self::Export => "export",
            Self::Import => "import",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MigrationError {
    #[error("{phase} failed: {source}")]
    Store {
        phase: MigrationPhase,
        #[source]
        source: StoreError,
    },
    #[error("migration cancelled")]
    Cancelled,
    /// A worker or the producer panicked or was aborted
    #[error("migration task failed: {0}")]
    Task(String),
}

impl MigrationError {
    /// Wrap a store error, folding store-level cancellation into [`MigrationError::Cancelled`].
    #[must_use]
    pub fn store(phase: MigrationPhase, source: StoreError) -> Self {
        match source {
            StoreError::Cancelled => Self::Cancelled,
            source => Self::Store { phase, source },
        }
    }

    /// The phase that failed, if the error came from a store call.
    #[must_use]
    pub fn phase(&self) -> Option<MigrationPhase> {
        match self {
            Self::Store { phase, .. } => Some(*phase),
            Self::Cancelled | Self::Task(_) => None,
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Every error from one run, joined into a single value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFailure {
    errors: Vec<MigrationError>,
}

impl MigrationFailure {
    /// `None` when there is nothing to report.
    #[must_use]
    pub fn from_errors(errors: Vec<MigrationError>) -> Option<Self> {
        (!errors.is_empty()).then_some(Self { errors })
    }

    #[must_use]
    pub fn errors(&self) -> &[MigrationError] {
        &self.errors
    }

    #[must_use]
    pub fn into_errors(self) -> Vec<MigrationError> {
        self.errors
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.errors.iter().any(MigrationError::is_cancelled)
    }

    /// Number of errors produced by `phase`.
    #[must_use]
    pub fn count_in(&self, phase: MigrationPhase) -> usize {
        self.errors.iter().filter(|e| e.phase() == Some(phase)).count()
    }
}

impl fmt::Display for MigrationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for MigrationFailure {}

/// Append-only error list shared by the drain step and readers.
#[derive(Debug, Default)]
pub struct ErrorAccumulator {
    errors: Mutex<Vec<MigrationError>>,
}

impl ErrorAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, err: MigrationError) {
        self.errors.lock().push(err);
    }

    /// Copy of the errors recorded so far.
    #[must_use]
    pub fn snapshot(&self) -> Vec<MigrationError> {
        self.errors.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.lock().is_empty()
    }

    #[must_use]
    pub fn contains_cancellation(&self) -> bool {
        self.errors.lock().iter().any(MigrationError::is_cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(msg: &str) -> StoreError {
        StoreError::Backend(msg.to_string())
    }

    #[test]
    fn test_store_error_display_includes_phase() {
        let err = MigrationError::store(MigrationPhase::Export, backend("boom"));
        assert_eq!(err.to_string(), "export failed: storage backend error: boom");
        assert_eq!(err.phase(), Some(MigrationPhase::Export));
    }

    #[test]
    fn test_store_cancellation_becomes_cancelled() {
        let err = MigrationError::store(MigrationPhase::Scan, StoreError::Cancelled);
        assert!(err.is_cancelled());
        assert_eq!(err.phase(), None);
    }

    #[test]
    fn test_failure_from_no_errors_is_none() {
        assert!(MigrationFailure::from_errors(vec![]).is_none());
    }

    #[test]
    fn test_failure_joins_every_error() {
        let failure = MigrationFailure::from_errors(vec![
            MigrationError::store(MigrationPhase::Export, backend("a")),
            MigrationError::store(MigrationPhase::Import, backend("b")),
            MigrationError::store(MigrationPhase::Import, backend("c")),
        ])
        .unwrap();

        assert_eq!(failure.len(), 3);
        assert_eq!(failure.count_in(MigrationPhase::Import), 2);
        assert_eq!(failure.count_in(MigrationPhase::Delete), 0);
        assert!(!failure.is_cancelled());

        let text = failure.to_string();
        assert_eq!(text.lines().count(), 3);
        assert!(text.contains("export failed"));
        assert!(text.lines().last().unwrap().ends_with('c'));
    }

    #[test]
    fn test_accumulator_snapshot_is_a_copy() {
        let acc = ErrorAccumulator::new();
        acc.push(MigrationError::Cancelled);

        let mut snapshot = acc.snapshot();
        snapshot.clear();

        assert_eq!(acc.len(), 1);
        assert!(acc.contains_cancellation());
    }
}
