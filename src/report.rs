// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! End-of-run summary.

use std::fmt;
use std::time::Duration;
use serde::Serialize;
use crate::config::MigrationConfig;
use crate::migrator::MigrationFailure;
use crate::progress::{ProgressSnapshot, ProgressTracker};
use crate::storage::redis::mask_password;

/// Everything worth telling the user once a run is over.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationSummary {
    pub status: RunStatus,
    pub source: String,
    pub destination: String,
    pub pattern: String,
    pub mode: String,
    pub conflict: String,
    pub progress: ProgressSnapshot,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    CompletedWithErrors,
    Cancelled,
}

impl MigrationSummary {
    #[must_use]
    pub fn new(
        config: &MigrationConfig,
        progress: &ProgressTracker,
        outcome: Result<(), &MigrationFailure>,
    ) -> Self {
        let (status, errors) = match outcome {
            Ok(()) => (RunStatus::Completed, Vec::new()),
            Err(failure) => {
                let status = if failure.is_cancelled() {
                    RunStatus::Cancelled
                } else {
                    RunStatus::CompletedWithErrors
                };
                (status, failure.errors().iter().map(ToString::to_string).collect())
            }
        };

        Self {
            status,
            source: mask_password(&config.source_url),
            destination: mask_password(&config.dest_url),
            pattern: config.pattern.clone(),
            mode: config.mode.to_string(),
            conflict: config.conflict.to_string(),
            progress: progress.snapshot(),
            errors,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for MigrationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = &self.progress;
        let heading = match self.status {
            RunStatus::Completed => "Migration complete",
            RunStatus::CompletedWithErrors => "Migration finished with errors",
            RunStatus::Cancelled => "Migration cancelled",
        };

        writeln!(f, "{}", heading)?;
        writeln!(f, "  source:       {}", self.source)?;
        writeln!(f, "  destination:  {}", self.destination)?;
        writeln!(f, "  pattern:      {}", self.pattern)?;
        writeln!(f, "  mode:         {}", self.mode)?;
        writeln!(f, "  conflict:     {}", self.conflict)?;
        writeln!(f, "  total:        {}", p.total)?;
        writeln!(f, "  processed:    {} ({})", p.processed, format_percent(p.completion_ratio))?;
        writeln!(f, "  succeeded:    {}", p.succeeded)?;
        if p.overwritten > 0 {
            writeln!(f, "  overwritten:  {}", p.overwritten)?;
        }
        if p.skipped > 0 {
            writeln!(f, "  skipped:      {}", p.skipped)?;
        }
        writeln!(f, "  failed:       {}", p.failed)?;
        writeln!(f, "  elapsed:      {}", format_duration(Duration::from_secs_f64(p.elapsed_secs)))?;
        write!(f, "  rate:         {}", format_rate(p.keys_per_second))?;

        if !self.errors.is_empty() {
            writeln!(f)?;
            write!(f, "Errors ({}):", self.errors.len())?;
            for err in &self.errors {
                writeln!(f)?;
                write!(f, "  - {}", err)?;
            }
        }
        Ok(())
    }
}

/// One-line progress for periodic logging.
#[must_use]
pub fn progress_line(snapshot: &ProgressSnapshot) -> String {
    format!(
        "{}/{} keys ({}) | {} | elapsed {} | eta {}",
        snapshot.processed,
        snapshot.total,
        format_percent(snapshot.completion_ratio),
        format_rate(snapshot.keys_per_second),
        format_duration(Duration::from_secs_f64(snapshot.elapsed_secs)),
        format_duration(Duration::from_secs_f64(snapshot.eta_secs)),
    )
}

#[must_use]
pub fn format_rate(keys_per_second: f64) -> String {
    format!("{:.1} keys/sec", keys_per_second)
}

#[must_use]
pub fn format_percent(ratio: f64) -> String {
    format!("{:.1}%", ratio * 100.0)
}

/// Whole seconds, e.g. `1h2m3s`, `4m0s`, `12s`.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64().round() as u64;
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h{}m{}s", h, m, s)
    } else if m > 0 {
        format!("{}m{}s", m, s)
    } else {
        format!("{}s", s)
    }
}
