// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Redis Migrate
//!
//! Move or copy every key matching a pattern from one Redis to another,
//! preserving values (of any type) and expirations.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   SCAN batches   ┌──────────────────────────────┐
//! │    source    │ ───────────────► │  bounded batch queue (2×N)   │
//! │  (KeyStore)  │                  └──────────────┬───────────────┘
//! └──────▲───────┘                                 │
//!        │ DUMP+PTTL / DEL (move)        ┌─────────┴─────────┐
//!        └────────────────────────────── │  worker 1 .. N    │
//!                                        └─────────┬─────────┘
//! ┌──────────────┐   RESTORE [REPLACE]             │
//! │ destination  │ ◄───────────────────────────────┘
//! │  (KeyStore)  │        counters ──► ProgressTracker
//! └──────────────┘        errors   ──► MigrationFailure
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use redis_migrate::{InMemoryStore, Migrator, MigrationConfig, ProgressTracker};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let source = Arc::new(InMemoryStore::new());
//! source.insert("user:1", "alice", Duration::ZERO);
//! source.insert("user:2", "bob", Duration::from_secs(60));
//! let dest = Arc::new(InMemoryStore::new());
//!
//! let config = MigrationConfig {
//!     source_url: "memory://source".into(),
//!     dest_url: "memory://dest".into(),
//!     pattern: "user:*".into(),
//!     ..Default::default()
//! };
//! let progress = Arc::new(ProgressTracker::new());
//! let migrator = Migrator::new(source, dest.clone(), config, progress.clone());
//!
//! migrator.migrate(CancellationToken::new()).await.unwrap();
//! assert_eq!(progress.succeeded(), 2);
//! assert!(dest.contains("user:2"));
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`migrator`]: the [`Migrator`] engine and its error types
//! - [`progress`]: live counters and derived rates
//! - [`storage`]: the [`KeyStore`] contract plus Redis and in-memory backends
//! - [`config`]: run configuration and validation
//! - [`report`]: end-of-run summary
//! - [`resilience`]: retry with backoff for idempotent store calls
//! - [`metrics`]: `metrics` facade instrumentation

pub mod config;
pub mod storage;
pub mod resilience;
pub mod progress;
pub mod migrator;
pub mod report;
pub mod metrics;

pub use config::{ConfigError, ConflictPolicy, MigrationConfig, MigrationMode};
pub use migrator::{ErrorAccumulator, MigrationError, MigrationFailure, MigrationPhase, Migrator};
pub use progress::{ProgressSnapshot, ProgressTracker};
pub use report::{MigrationSummary, RunStatus};
pub use storage::traits::{KeyEntry, KeyStore, StoreError};
pub use storage::memory::InMemoryStore;
pub use storage::redis::RedisStore;
pub use resilience::retry::RetryConfig;
pub use crate::metrics::LatencyTimer;
