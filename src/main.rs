//! objsync demo
//!
//! Sets up an in-memory bucket through the full decorator stack and walks
//! through the sync paths: a first upload, an append, a clobbered append,
//! a garbage collection sweep, and a bucket that does not exist.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | RUST_LOG | info | Log filter |
//! | OBJSYNC_LOG_JSON | - | Set to `1` for JSON log lines |
//! | OBJSYNC_CONFIG | - | TOML bucket config file |

use objsync::storage::FakeStorage;
use objsync::sync::garbage_collect_once;
use objsync::{BucketConfig, BucketManager, LocalContent, OpContext, RealClock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("OBJSYNC_LOG_JSON").as_deref() == Ok("1") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load_config() -> Result<BucketConfig, Box<dyn std::error::Error>> {
    let mut config = match std::env::var("OBJSYNC_CONFIG") {
        Ok(path) => BucketConfig::from_toml_file(path)?,
        Err(_) => BucketConfig::default(),
    };
    // Small files should still exercise the append path
    config.append_threshold = config.append_threshold.min(4);
    config.enable_monitoring = true;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = load_config()?;
    let clock = Arc::new(RealClock);
    let storage = FakeStorage::new(clock.clone());
    let raw = storage.create_bucket("demo");

    let manager = BucketManager::new(config, clock, Arc::new(storage.clone()));
    let ctx = OpContext::background();
    let bucket = manager.set_up_bucket(&ctx, "demo").await?;

    let v1 = bucket
        .sync_object(&ctx, "notes.txt", None, &LocalContent::new("hello"))
        .await?;
    info!(generation = v1.generation, size = v1.size, "Created object");

    let appended = LocalContent::new("hello, world").with_dirty_threshold(v1.size);
    let v2 = bucket
        .sync_object(&ctx, "notes.txt", Some(&v1), &appended)
        .await?;
    info!(
        generation = v2.generation,
        size = v2.size,
        components = v2.component_count,
        "Appended to object"
    );

    // v1 is stale now; appending on top of it must not lose v2
    let stale = LocalContent::new("hello!!").with_dirty_threshold(v1.size);
    match bucket.sync_object(&ctx, "notes.txt", Some(&v1), &stale).await {
        Err(err) if err.is_precondition() => info!(error = %err, "Stale append rejected"),
        Err(err) => error!(error = %err, "Stale append failed unexpectedly"),
        Ok(object) => error!(generation = object.generation, "Stale append succeeded"),
    }
    info!(objects = ?raw.object_names(), "Bucket contents");

    // A staging object left behind by a crashed append
    let orphan = format!("{}{:016x}", manager.config().tmp_object_prefix, 0xdead_u64);
    raw.put(&orphan, "lost tail", HashMap::new());
    let report = garbage_collect_once(
        &ctx,
        &manager.config().tmp_object_prefix,
        &raw,
        &RealClock,
        Duration::ZERO,
    )
    .await?;
    info!(listed = report.listed, deleted = report.deleted, "Collected staging objects");

    match manager.set_up_bucket(&ctx, "no-such-bucket").await {
        Ok(_) => error!("Missing bucket was reported usable"),
        Err(err) => info!(error = %err, "Missing bucket rejected"),
    }

    println!("{}", manager.metrics().to_json()?);
    manager.shut_down().await;
    Ok(())
}
