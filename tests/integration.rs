//! Integration Tests for Redis Migrate
//!
//! These tests run the migration engine against real Redis servers.
//! Tests use testcontainers for portability - no external docker-compose required.
//!
//! # Running Tests
//! ```bash
//! # Run all integration tests (requires Docker)
//! cargo test --test integration -- --ignored
//!
//! # Run only happy-path tests
//! cargo test --test integration happy -- --ignored
//!
//! # Run only conflict policy tests
//! cargo test --test integration conflict -- --ignored
//! ```
//!
//! # Test Organization
//! - `happy_*` - Normal operation: every data type, TTLs, patterns, move mode
//! - `conflict_*` - Destination already holds some of the keys
//! - `failure_*` - Closed backends

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use redis::aio::ConnectionManager;
use redis::cmd;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use redis_migrate::{
    ConflictPolicy, KeyEntry, KeyStore, MigrationConfig, MigrationMode, MigrationPhase, Migrator,
    ProgressTracker, RedisStore, StoreError,
};

use testcontainers::{clients::Cli, Container, GenericImage, core::WaitFor};

// =============================================================================
// Container Helpers
// =============================================================================

/// Create a Redis container with health check
fn redis_container(docker: &Cli) -> Container<'_, GenericImage> {
    let image = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379)
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));
    docker.run(image)
}

fn redis_url(container: &Container<'_, GenericImage>, db: u8) -> String {
    format!("redis://127.0.0.1:{}/{}", container.get_host_port_ipv4(6379), db)
}

/// Source on db 0, destination on db 1 of the same server.
async fn store_pair(container: &Container<'_, GenericImage>) -> (RedisStore, RedisStore) {
    let source = RedisStore::connect(&redis_url(container, 0)).await.expect("source connect");
    let dest = RedisStore::connect(&redis_url(container, 1)).await.expect("dest connect");
    (source, dest)
}

fn config(source: &RedisStore, dest: &RedisStore, pattern: &str) -> MigrationConfig {
    MigrationConfig {
        source_url: source.display_url().to_string(),
        dest_url: dest.display_url().to_string(),
        pattern: pattern.into(),
        batch_size: 10,
        concurrency: 4,
        ..Default::default()
    }
}

async fn set_strings(conn: &mut ConnectionManager, prefix: &str, count: usize) {
    let mut pipeline = redis::pipe();
    for i in 0..count {
        pipeline.cmd("SET").arg(format!("{}:{}", prefix, i)).arg(format!("value-{}", i)).ignore();
    }
    let _: () = pipeline.query_async(conn).await.expect("seed strings");
}

async fn get(conn: &mut ConnectionManager, key: &str) -> Option<String> {
    cmd("GET").arg(key).query_async(conn).await.expect("GET")
}

async fn pttl(conn: &mut ConnectionManager, key: &str) -> i64 {
    cmd("PTTL").arg(key).query_async(conn).await.expect("PTTL")
}

async fn dbsize(conn: &mut ConnectionManager) -> u64 {
    cmd("DBSIZE").query_async(conn).await.expect("DBSIZE")
}

async fn run(
    source: RedisStore,
    dest: RedisStore,
    config: MigrationConfig,
) -> (Arc<ProgressTracker>, Result<(), redis_migrate::MigrationFailure>) {
    let progress = Arc::new(ProgressTracker::new());
    let migrator = Migrator::new(Arc::new(source), Arc::new(dest), config, progress.clone());
    let result = migrator.migrate(CancellationToken::new()).await;
    (progress, result)
}

// =============================================================================
// Happy Path Tests
// =============================================================================

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_copy_preserves_every_data_type() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let (source, dest) = store_pair(&redis).await;
    let mut src = source.connection();
    let mut dst = dest.connection();

    let _: () = redis::pipe()
        .cmd("SET").arg("app:string").arg("hello").ignore()
        .cmd("HSET").arg("app:hash").arg("name").arg("alice").arg("age").arg("30").ignore()
        .cmd("RPUSH").arg("app:list").arg("a").arg("b").arg("c").ignore()
        .cmd("SADD").arg("app:set").arg("x").arg("y").ignore()
        .cmd("ZADD").arg("app:zset").arg(1).arg("one").arg(2).arg("two").ignore()
        .query_async(&mut src)
        .await
        .expect("seed");

    let cfg = config(&source, &dest, "app:*");
    let (progress, result) = run(source, dest, cfg).await;
    result.expect("migration should succeed");

    assert_eq!(progress.total(), 5);
    assert_eq!(progress.succeeded(), 5);
    assert_eq!(progress.failed(), 0);

    assert_eq!(get(&mut dst, "app:string").await.as_deref(), Some("hello"));

    let hash: HashMap<String, String> = cmd("HGETALL").arg("app:hash").query_async(&mut dst).await.unwrap();
    assert_eq!(hash.get("name").map(String::as_str), Some("alice"));
    assert_eq!(hash.get("age").map(String::as_str), Some("30"));

    let list: Vec<String> = cmd("LRANGE").arg("app:list").arg(0).arg(-1).query_async(&mut dst).await.unwrap();
    assert_eq!(list, vec!["a", "b", "c"]);

    let mut set: Vec<String> = cmd("SMEMBERS").arg("app:set").query_async(&mut dst).await.unwrap();
    set.sort();
    assert_eq!(set, vec!["x", "y"]);

    let zset: Vec<(String, f64)> = cmd("ZRANGE")
        .arg("app:zset").arg(0).arg(-1).arg("WITHSCORES")
        .query_async(&mut dst)
        .await
        .unwrap();
    assert_eq!(zset, vec![("one".to_string(), 1.0), ("two".to_string(), 2.0)]);

    // Copy mode leaves the source alone
    assert_eq!(dbsize(&mut src).await, 5);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_ttl_survives_migration() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let (source, dest) = store_pair(&redis).await;
    let mut src = source.connection();
    let mut dst = dest.connection();

    let _: () = redis::pipe()
        .cmd("SET").arg("session:1").arg("a").arg("PX").arg(600_000).ignore()
        .cmd("SET").arg("session:2").arg("b").ignore()
        .query_async(&mut src)
        .await
        .unwrap();

    let cfg = config(&source, &dest, "session:*");
    let (_, result) = run(source, dest, cfg).await;
    result.unwrap();

    let ttl = pttl(&mut dst, "session:1").await;
    assert!(ttl > 590_000 && ttl <= 600_000, "ttl was {}", ttl);
    assert_eq!(pttl(&mut dst, "session:2").await, -1, "persistent keys stay persistent");
}

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_pattern_selects_only_matching_keys() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let (source, dest) = store_pair(&redis).await;
    let mut src = source.connection();
    let mut dst = dest.connection();

    set_strings(&mut src, "user", 25).await;
    set_strings(&mut src, "order", 10).await;

    let cfg = config(&source, &dest, "user:*");
    let (progress, result) = run(source, dest, cfg).await;
    result.unwrap();

    assert_eq!(progress.total(), 25);
    assert_eq!(progress.processed(), 25);
    assert_eq!(dbsize(&mut dst).await, 25);
    assert_eq!(get(&mut dst, "order:0").await, None);
    assert_eq!(get(&mut dst, "user:24").await.as_deref(), Some("value-24"));
}

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_move_removes_source_keys() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let (source, dest) = store_pair(&redis).await;
    let mut src = source.connection();
    let mut dst = dest.connection();

    set_strings(&mut src, "cache", 100).await;
    set_strings(&mut src, "keep", 3).await;

    let mut cfg = config(&source, &dest, "cache:*");
    cfg.mode = MigrationMode::Move;
    let (progress, result) = run(source, dest, cfg).await;
    result.unwrap();

    assert_eq!(progress.succeeded(), 100);
    assert_eq!(dbsize(&mut dst).await, 100);
    assert_eq!(dbsize(&mut src).await, 3, "only non-matching keys remain");
}

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_between_two_servers() {
    let docker = Cli::default();
    let old = redis_container(&docker);
    let new = redis_container(&docker);

    let source = RedisStore::connect(&redis_url(&old, 0)).await.unwrap();
    let dest = RedisStore::connect(&redis_url(&new, 0)).await.unwrap();
    let mut src = source.connection();
    let mut dst = dest.connection();
    set_strings(&mut src, "k", 1000).await;

    let mut cfg = config(&source, &dest, "*");
    cfg.batch_size = 64;
    cfg.concurrency = 8;
    let (progress, result) = run(source, dest, cfg).await;
    result.unwrap();

    assert_eq!(progress.total(), 1000);
    assert_eq!(progress.succeeded(), 1000);
    assert_eq!(dbsize(&mut dst).await, 1000);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_stream_keys_honours_batch_size() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let (source, _dest) = store_pair(&redis).await;
    let mut src = source.connection();
    set_strings(&mut src, "item", 53).await;

    assert_eq!(source.count_keys("item:*", 7).await.unwrap(), 53);

    let (tx, mut rx) = mpsc::channel(4);
    let scan = tokio::spawn(async move {
        source.stream_keys("item:*", 7, tx, CancellationToken::new()).await
    });

    let mut seen = Vec::new();
    while let Some(batch) = rx.recv().await {
        assert!(!batch.is_empty() && batch.len() <= 7, "batch of {}", batch.len());
        seen.extend(batch);
    }
    scan.await.unwrap().unwrap();

    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 53);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_export_omits_missing_keys() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let (source, _dest) = store_pair(&redis).await;
    let mut src = source.connection();
    let _: () = cmd("SET").arg("present").arg("1").arg("EX").arg(60).query_async(&mut src).await.unwrap();

    let entries = source
        .export_keys(&["present".to_string(), "absent".to_string()])
        .await
        .unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].key, "present");
    assert!(entries[0].expires());
    assert!(entries[0].ttl <= Duration::from_secs(60));
}

// =============================================================================
// Conflict Policy Tests
// =============================================================================

#[tokio::test]
#[ignore] // Requires Docker
async fn conflict_skip_leaves_existing_value() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let (source, dest) = store_pair(&redis).await;
    let mut src = source.connection();
    let mut dst = dest.connection();

    set_strings(&mut src, "user", 4).await;
    let _: () = cmd("SET").arg("user:1").arg("already-here").query_async(&mut dst).await.unwrap();

    let mut cfg = config(&source, &dest, "user:*");
    cfg.conflict = ConflictPolicy::Skip;
    let (progress, result) = run(source, dest, cfg).await;
    result.unwrap();

    assert_eq!(get(&mut dst, "user:1").await.as_deref(), Some("already-here"));
    assert_eq!(get(&mut dst, "user:2").await.as_deref(), Some("value-2"));
    assert_eq!(progress.succeeded(), 3);
    // Skipped keys are reported as failed, the skipped counter stays at zero
    assert_eq!(progress.failed(), 1);
    assert_eq!(progress.skipped(), 0);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn conflict_overwrite_replaces_value_and_ttl() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let (source, dest) = store_pair(&redis).await;
    let mut src = source.connection();
    let mut dst = dest.connection();

    let _: () = cmd("SET").arg("cfg:mode").arg("new").query_async(&mut src).await.unwrap();
    let _: () = cmd("SET").arg("cfg:mode").arg("old").arg("EX").arg(30).query_async(&mut dst).await.unwrap();

    let mut cfg = config(&source, &dest, "cfg:*");
    cfg.conflict = ConflictPolicy::Overwrite;
    let (progress, result) = run(source, dest, cfg).await;
    result.unwrap();

    assert_eq!(get(&mut dst, "cfg:mode").await.as_deref(), Some("new"));
    assert_eq!(pttl(&mut dst, "cfg:mode").await, -1);
    assert_eq!(progress.overwritten(), 1);
    assert_eq!(progress.succeeded(), 0);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn conflict_error_fails_the_batch() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let (source, dest) = store_pair(&redis).await;
    let mut src = source.connection();
    let mut dst = dest.connection();

    set_strings(&mut src, "user", 3).await;
    let _: () = cmd("SET").arg("user:0").arg("taken").query_async(&mut dst).await.unwrap();

    let mut cfg = config(&source, &dest, "user:*");
    cfg.batch_size = 100;
    let (progress, result) = run(source, dest, cfg).await;

    let failure = result.unwrap_err();
    assert_eq!(failure.count_in(MigrationPhase::Import), 1);
    assert!(failure.to_string().contains("BUSYKEY"), "{}", failure);
    assert_eq!(progress.failed(), 3);
    assert_eq!(get(&mut dst, "user:0").await.as_deref(), Some("taken"));
}

#[tokio::test]
#[ignore] // Requires Docker
async fn conflict_skip_with_corrupt_payload_reports_written_keys() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let (source, dest) = store_pair(&redis).await;
    let mut src = source.connection();
    let mut dst = dest.connection();

    set_strings(&mut src, "doc", 2).await;
    let exported = source
        .export_keys(&["doc:0".to_string(), "doc:1".to_string()])
        .await
        .unwrap();
    assert_eq!(exported.len(), 2);

    let batch = vec![
        exported[0].clone(),
        KeyEntry::new("doc:bad", b"not a dump payload".to_vec(), Duration::ZERO),
        exported[1].clone(),
    ];

    for policy in [ConflictPolicy::Skip, ConflictPolicy::Overwrite] {
        let _: () = cmd("FLUSHDB").query_async(&mut dst).await.unwrap();
        let written = dest.import_keys(&batch, policy).await.unwrap();

        // The corrupt entry is the only one left out
        assert_eq!(written, vec!["doc:0".to_string(), "doc:1".to_string()], "{}", policy);
        assert_eq!(get(&mut dst, "doc:0").await.as_deref(), Some("value-0"));
        assert_eq!(get(&mut dst, "doc:1").await.as_deref(), Some("value-1"));
        assert_eq!(dbsize(&mut dst).await, 2);
    }
}

// =============================================================================
// Failure Tests
// =============================================================================

#[tokio::test]
#[ignore] // Requires Docker
async fn failure_closed_store_rejects_calls() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let (source, _dest) = store_pair(&redis).await;

    source.close().await.unwrap();
    source.close().await.unwrap();

    assert_eq!(source.count_keys("*", 10).await, Err(StoreError::Closed));
    assert_eq!(source.delete_keys(&["x".to_string()]).await, Err(StoreError::Closed));
}
