// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::time::Duration;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use crate::config::ConflictPolicy;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("store connection is closed")]
    Closed,
}

/// A key exported from a store: its serialized value plus remaining TTL.
///
/// The payload is opaque and store-specific (for Redis, the `DUMP` format).
/// A `ttl` of [`Duration::ZERO`] means the key never expires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEntry {
    pub key: String,
    pub payload: Vec<u8>,
    pub ttl: Duration,
}

impl KeyEntry {
    pub fn new(key: impl Into<String>, payload: Vec<u8>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            payload,
            ttl,
        }
    }

    /// Whether the key carries an expiration.
    #[must_use]
    pub fn expires(&self) -> bool {
        !self.ttl.is_zero()
    }
}

/// Everything the migrator needs from one end of a migration.
///
/// Source and destination each hold their own instance. Implementations
/// must be safe to share between the producer and every worker.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Push every key matching `pattern` into `sink`, in batches of at most
    /// `batch_size` keys.
    ///
    /// Returns [`StoreError::Cancelled`] as soon as `cancel` fires, including
    /// while waiting for room in `sink`. A dropped receiver ends the scan
    /// without error.
    async fn stream_keys(
        &self,
        pattern: &str,
        batch_size: usize,
        sink: mpsc::Sender<Vec<String>>,
        cancel: CancellationToken,
    ) -> Result<(), StoreError>;

    /// Count keys matching `pattern`. May be stale under concurrent writes.
    async fn count_keys(&self, pattern: &str, batch_size: usize) -> Result<u64, StoreError>;

    /// Serialize the given keys. Keys that vanished or cannot be serialized
    /// are left out of the result rather than failing the batch.
    async fn export_keys(&self, keys: &[String]) -> Result<Vec<KeyEntry>, StoreError>;

    /// Write entries honouring `policy`, returning the keys actually written.
    async fn import_keys(
        &self,
        entries: &[KeyEntry],
        policy: ConflictPolicy,
    ) -> Result<Vec<String>, StoreError>;

    /// Remove keys. An empty slice is a no-op.
    async fn delete_keys(&self, keys: &[String]) -> Result<(), StoreError>;

    /// Release the connection. Calling it twice is harmless.
    async fn close(&self) -> Result<(), StoreError>;
}
