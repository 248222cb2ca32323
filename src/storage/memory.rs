// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use crate::config::ConflictPolicy;
use super::pattern::glob_match;
use super::traits::{KeyEntry, KeyStore, StoreError};

#[derive(Debug, Clone)]
struct StoredValue {
    payload: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn new(payload: Vec<u8>, ttl: Duration) -> Self {
        Self {
            payload,
            expires_at: (!ttl.is_zero()).then(|| Instant::now() + ttl),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }

    fn remaining_ttl(&self, now: Instant) -> Duration {
        self.expires_at
            .map_or(Duration::ZERO, |at| at.saturating_duration_since(now))
    }
}

/// Key store held entirely in process memory.
///
/// Payloads are stored as-is, so an entry exported from here imports
/// anywhere else that treats payloads as opaque. Expired keys are dropped
/// lazily when something looks at them.
pub struct InMemoryStore {
    data: DashMap<String, StoredValue>,
    closed: AtomicBool,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Insert a value directly. A zero `ttl` means no expiration.
    pub fn insert(&self, key: impl Into<String>, payload: impl Into<Vec<u8>>, ttl: Duration) {
        self.data.insert(key.into(), StoredValue::new(payload.into(), ttl));
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();
        self.data
            .get(key)
            .filter(|v| v.is_live(now))
            .map(|v| v.payload.clone())
    }

    /// Remaining TTL, `Some(Duration::ZERO)` for a key without expiration.
    #[must_use]
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.data
            .get(key)
            .filter(|v| v.is_live(now))
            .map(|v| v.remaining_ttl(now))
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Sorted list of live keys.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.matching_keys("*")
    }

    /// Get current live key count
    #[must_use]
    pub fn len(&self) -> usize {
        self.purge_expired();
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.data.clear();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn purge_expired(&self) {
        let now = Instant::now();
        self.data.retain(|_, v| v.is_live(now));
    }

    /// Live keys matching `pattern`, sorted so scans are deterministic.
    fn matching_keys(&self, pattern: &str) -> Vec<String> {
        self.purge_expired();
        let mut keys: Vec<String> = self
            .data
            .iter()
            .filter(|entry| glob_match(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.is_closed() {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyStore for InMemoryStore {
    async fn stream_keys(
        &self,
        pattern: &str,
        batch_size: usize,
        sink: mpsc::Sender<Vec<String>>,
        cancel: CancellationToken,
    ) -> Result<(), StoreError> {
        self.ensure_open()?;
        let keys = self.matching_keys(pattern);

        for chunk in keys.chunks(batch_size.max(1)) {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(StoreError::Cancelled),
                sent = sink.send(chunk.to_vec()) => {
                    if sent.is_err() {
                        debug!("Key batch receiver dropped, ending scan");
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }

    async fn count_keys(&self, pattern: &str, _batch_size: usize) -> Result<u64, StoreError> {
        self.ensure_open()?;
        Ok(self.matching_keys(pattern).len() as u64)
    }

    async fn export_keys(&self, keys: &[String]) -> Result<Vec<KeyEntry>, StoreError> {
        self.ensure_open()?;
        let now = Instant::now();
        Ok(keys
            .iter()
            .filter_map(|key| {
                let value = self.data.get(key)?;
                value
                    .is_live(now)
                    .then(|| KeyEntry::new(key.clone(), value.payload.clone(), value.remaining_ttl(now)))
            })
            .collect())
    }

    async fn import_keys(
        &self,
        entries: &[KeyEntry],
        policy: ConflictPolicy,
    ) -> Result<Vec<String>, StoreError> {
        self.ensure_open()?;

        match policy {
            ConflictPolicy::Error => {
                let conflicts: Vec<&str> = entries
                    .iter()
                    .filter(|e| self.contains(&e.key))
                    .map(|e| e.key.as_str())
                    .collect();
                if !conflicts.is_empty() {
                    return Err(StoreError::Backend(format!(
                        "target key name is busy: {}",
                        conflicts.join(", ")
                    )));
                }
            }
            ConflictPolicy::Skip | ConflictPolicy::Overwrite => {}
        }

        let mut written = Vec::with_capacity(entries.len());
        for entry in entries {
            if policy == ConflictPolicy::Skip && self.contains(&entry.key) {
                continue;
            }
            self.data.insert(entry.key.clone(), StoredValue::new(entry.payload.clone(), entry.ttl));
            written.push(entry.key.clone());
        }
        Ok(written)
    }

    async fn delete_keys(&self, keys: &[String]) -> Result<(), StoreError> {
        self.ensure_open()?;
        for key in keys {
            self.data.remove(key);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
