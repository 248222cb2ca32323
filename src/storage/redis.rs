// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis store backend.
//!
//! Keys travel as opaque `DUMP` payloads paired with their `PTTL`, and are
//! written back with `RESTORE`, so every Redis data type migrates without
//! the tool having to understand it:
//!
//! ```text
//! source:  SCAN MATCH <pattern> COUNT <batch>  →  DUMP k / PTTL k (pipelined)
//! dest:    RESTORE k <ttl-ms> <payload> [REPLACE] (one request per key, multiplexed)
//! source:  DEL k1 k2 ...                              (move mode only)
//! ```
//!
//! Idempotent reads are retried with [`RetryConfig::query()`]; writes are
//! sent exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{cmd, pipe, Client, ErrorKind, RedisError, Value};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use crate::config::ConflictPolicy;
use crate::resilience::retry::{retry, RetryConfig};
use super::traits::{KeyEntry, KeyStore, StoreError};

/// Bound on each connection attempt and on the `PING` that follows it
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

impl From<RedisError> for StoreError {
    fn from(e: RedisError) -> Self {
        if e.is_connection_refusal() || e.is_connection_dropped() || e.is_io_error() {
            StoreError::Connection(e.to_string())
        } else {
            StoreError::Backend(e.to_string())
        }
    }
}

pub struct RedisStore {
    connection: ConnectionManager,
    /// Connection string with any password masked, for log output
    display_url: String,
    closed: AtomicBool,
}

impl RedisStore {
    /// Connect and verify the server answers `PING`.
    ///
    /// Each attempt is bounded by a 5 second timeout and the attempts follow
    /// the startup retry preset, so a wrong host fails within seconds instead
    /// of hanging.
    ///
    /// ```rust,no_run
    /// # use redis_migrate::storage::redis::RedisStore;
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let store = RedisStore::connect("redis://localhost:6379/0").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(connection_string: &str) -> Result<Self, StoreError> {
        let client = Client::open(connection_string)
            .map_err(|e| StoreError::Connection(format!("failed to parse connection string: {}", e)))?;

        let connection = retry("redis_connect", &RetryConfig::startup(), || async {
            let mut conn = ConnectionManager::new_with_config(client.clone(), manager_config()).await?;
            let _: String = tokio::time::timeout(CONNECT_TIMEOUT, cmd("PING").query_async(&mut conn))
                .await
                .map_err(|_| RedisError::from((ErrorKind::IoError, "PING timed out")))??;
            Ok(conn)
        })
        .await
        .map_err(|e: RedisError| StoreError::Connection(e.to_string()))?;

        let display_url = mask_password(connection_string);
        info!(url = %display_url, "Connected to Redis");

        Ok(Self {
            connection,
            display_url,
            closed: AtomicBool::new(false),
        })
    }

    /// Connection string with the password replaced by `***`.
    pub fn display_url(&self) -> &str {
        &self.display_url
    }

    /// Get a clone of the connection manager
    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }

    fn conn(&self) -> Result<ConnectionManager, StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(self.connection.clone())
    }

    /// One `SCAN` step. Returns the next cursor and the keys of this page.
    async fn scan_page(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), StoreError> {
        let conn = self.conn()?;
        retry("redis_scan", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            async move {
                let page: (u64, Vec<String>) = cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(pattern)
                    .arg("COUNT")
                    .arg(count)
                    .query_async(&mut conn)
                    .await?;
                Ok(page)
            }
        })
        .await
        .map_err(|e: RedisError| StoreError::Backend(format!("failed to scan keys: {}", e)))
    }

    /// Check which keys already exist (pipelined).
    /// Returns a vec of bools matching the input order.
    pub async fn exists_batch(&self, keys: &[String]) -> Result<Vec<bool>, StoreError> {
        if keys.is_empty() {
            return Ok(vec![]);
        }

        let conn = self.conn()?;
        retry("redis_exists_batch", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            async move {
                let mut pipeline = pipe();
                for key in keys {
                    pipeline.exists(key);
                }
                let results: Vec<bool> = pipeline.query_async(&mut conn).await?;
                Ok(results)
            }
        })
        .await
        .map_err(|e: RedisError| StoreError::Backend(e.to_string()))
    }

    /// `RESTORE` every entry, one request per key.
    ///
    /// The requests are issued concurrently over the multiplexed connection,
    /// so they share the wire like a pipeline while each key keeps its own
    /// reply. Results come back in input order.
    async fn restore_all(
        &self,
        entries: &[&KeyEntry],
        replace: bool,
    ) -> Result<Vec<Result<(), RedisError>>, StoreError> {
        let conn = self.conn()?;
        let mut tasks = JoinSet::new();
        for (idx, entry) in entries.iter().enumerate() {
            let mut conn = conn.clone();
            let mut restore = cmd("RESTORE");
            restore
                .arg(&entry.key)
                .arg(ttl_millis(entry.ttl))
                .arg(entry.payload.as_slice());
            if replace {
                restore.arg("REPLACE");
            }
            tasks.spawn(async move { (idx, restore.query_async::<()>(&mut conn).await) });
        }

        let mut outcomes: Vec<Option<Result<(), RedisError>>> = entries.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            let (idx, outcome) = joined
                .map_err(|e| StoreError::Backend(format!("restore task failed: {}", e)))?;
            outcomes[idx] = Some(outcome);
        }
        Ok(outcomes
            .into_iter()
            .map(|o| o.unwrap_or_else(|| Err(RedisError::from((ErrorKind::ClientError, "restore reply missing")))))
            .collect())
    }
}

#[async_trait]
impl KeyStore for RedisStore {
    async fn stream_keys(
        &self,
        pattern: &str,
        batch_size: usize,
        sink: mpsc::Sender<Vec<String>>,
        cancel: CancellationToken,
    ) -> Result<(), StoreError> {
        let batch_size = batch_size.max(1);
        let mut cursor = 0u64;
        let mut pending: Vec<String> = Vec::with_capacity(batch_size);

        loop {
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }

            let (next, keys) = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(StoreError::Cancelled),
                page = self.scan_page(cursor, pattern, batch_size) => page?,
            };
            pending.extend(keys);
            cursor = next;
            let finished = cursor == 0;

            // COUNT is only a hint, so re-chunk to honour batch_size
            while pending.len() >= batch_size || (finished && !pending.is_empty()) {
                let rest = if pending.len() > batch_size {
                    pending.split_off(batch_size)
                } else {
                    Vec::new()
                };
                let batch = std::mem::replace(&mut pending, rest);

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(StoreError::Cancelled),
                    sent = sink.send(batch) => {
                        if sent.is_err() {
                            debug!("Key batch receiver dropped, ending scan");
                            return Ok(());
                        }
                    }
                }
            }

            if finished {
                return Ok(());
            }
        }
    }

    async fn count_keys(&self, pattern: &str, batch_size: usize) -> Result<u64, StoreError> {
        let mut cursor = 0u64;
        let mut count = 0u64;
        loop {
            let (next, keys) = self.scan_page(cursor, pattern, batch_size.max(1)).await?;
            count += keys.len() as u64;
            cursor = next;
            if cursor == 0 {
                return Ok(count);
            }
        }
    }

    async fn export_keys(&self, keys: &[String]) -> Result<Vec<KeyEntry>, StoreError> {
        if keys.is_empty() {
            return Ok(vec![]);
        }

        let conn = self.conn()?;
        let replies: Vec<Value> = retry("redis_dump", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            async move {
                let mut pipeline = pipe();
                for key in keys {
                    pipeline.cmd("DUMP").arg(key);
                    pipeline.cmd("PTTL").arg(key);
                }
                let replies: Vec<Value> = pipeline.query_async(&mut conn).await?;
                Ok(replies)
            }
        })
        .await
        .map_err(|e: RedisError| StoreError::Backend(format!("failed to dump keys: {}", e)))?;

        let mut entries = Vec::with_capacity(keys.len());
        for (key, pair) in keys.iter().zip(replies.chunks(2)) {
            let [dump, pttl] = pair else { continue };
            let payload: Option<Vec<u8>> = match redis::from_redis_value(dump) {
                Ok(payload) => payload,
                Err(e) => {
                    debug!(key = %key, error = %e, "Skipping key with unreadable DUMP reply");
                    continue;
                }
            };
            let pttl: i64 = match redis::from_redis_value(pttl) {
                Ok(pttl) => pttl,
                Err(_) => continue,
            };
            let (Some(payload), Some(ttl)) = (payload, ttl_from_pttl(pttl)) else {
                // Key vanished between SCAN and DUMP
                continue;
            };
            entries.push(KeyEntry::new(key.clone(), payload, ttl));
        }
        Ok(entries)
    }

    async fn import_keys(
        &self,
        entries: &[KeyEntry],
        policy: ConflictPolicy,
    ) -> Result<Vec<String>, StoreError> {
        if entries.is_empty() {
            return Ok(vec![]);
        }

        let to_write: Vec<&KeyEntry> = match policy {
            ConflictPolicy::Skip => {
                let keys: Vec<String> = entries.iter().map(|e| e.key.clone()).collect();
                let exists = self.exists_batch(&keys).await?;
                entries
                    .iter()
                    .zip(exists)
                    .filter_map(|(entry, exists)| (!exists).then_some(entry))
                    .collect()
            }
            ConflictPolicy::Error | ConflictPolicy::Overwrite => entries.iter().collect(),
        };
        if to_write.is_empty() {
            return Ok(vec![]);
        }

        let replace = policy == ConflictPolicy::Overwrite;
        let outcomes = self.restore_all(&to_write, replace).await?;

        let mut written = Vec::with_capacity(to_write.len());
        for (entry, outcome) in to_write.iter().zip(outcomes) {
            match outcome {
                Ok(()) => written.push(entry.key.clone()),
                Err(e) if e.is_io_error() || e.is_connection_dropped() => {
                    return Err(StoreError::from(e));
                }
                // One rejected key fails the whole batch under the error
                // policy, even though its siblings were written
                Err(e) if policy == ConflictPolicy::Error => {
                    return Err(StoreError::Backend(format!("failed to restore keys: {}", e)));
                }
                Err(e) => warn!(key = %entry.key, error = %e, "RESTORE failed"),
            }
        }
        Ok(written)
    }

    async fn delete_keys(&self, keys: &[String]) -> Result<(), StoreError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn()?;
        let _: u64 = cmd("DEL")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(format!("failed to delete keys: {}", e)))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(url = %self.display_url, "Closed Redis store");
        }
        Ok(())
    }
}

/// `RESTORE` takes 0 for "no expiration".
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
}

/// Map a `PTTL` reply to a TTL: -1 means persistent, -2 means the key is gone.
fn ttl_from_pttl(pttl: i64) -> Option<Duration> {
    match pttl {
        -2 => None,
        ms if ms < 0 => Some(Duration::ZERO),
        // A key on the verge of expiring still needs a positive TTL or
        // RESTORE would make it persistent
        0 => Some(Duration::from_millis(1)),
        ms => Some(Duration::from_millis(ms as u64)),
    }
}

fn manager_config() -> ConnectionManagerConfig {
    ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(CONNECT_TIMEOUT)
}

/// Replace the password part of a connection string with `***`.
pub fn mask_password(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((userinfo, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match userinfo.split_once(':') {
        Some((user, _)) => format!("{}://{}:***@{}", scheme, user, host),
        None => format!("{}://***@{}", scheme, host),
    }
}
