//! Staging-object garbage collection
//!
//! Appends delete their own staging objects, but a crash or a failed delete
//! can leave one behind. A [`GarbageCollector`] periodically lists everything
//! under the staging prefix and deletes objects old enough that no append can
//! still be using them.

use crate::clock::Clock;
use crate::context::OpContext;
use crate::storage::{list_prefix, Bucket, BucketError, DeleteObjectRequest};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default time between sweeps
pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Default age before a staging object counts as orphaned
pub const DEFAULT_GC_GRACE_PERIOD: Duration = Duration::from_secs(30 * 60);

/// Outcome of one successful sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Objects found under the prefix
    pub listed: usize,
    /// Stale objects deleted (including ones already gone)
    pub deleted: usize,
}

/// A sweep that failed part-way
#[derive(Debug, Error)]
#[error("garbage collection deleted {deleted} objects, {failed} deletes failed: {source}")]
pub struct SweepError {
    pub deleted: usize,
    pub failed: usize,
    /// First failure encountered
    #[source]
    pub source: BucketError,
}

/// Delete every object under `prefix` whose last update is at least `grace`
/// old according to `clock`.
///
/// A failed delete does not stop the sweep; the first failure is reported
/// once every stale object has been tried.
pub async fn garbage_collect_once(
    ctx: &OpContext,
    prefix: &str,
    bucket: &dyn Bucket,
    clock: &dyn Clock,
    grace: Duration,
) -> Result<SweepReport, SweepError> {
    if prefix.is_empty() {
        return Err(SweepError {
            deleted: 0,
            failed: 0,
            source: BucketError::InvalidArgument(
                "refusing to garbage collect an empty prefix".to_string(),
            ),
        });
    }

    let objects = list_prefix(ctx, bucket, prefix)
        .await
        .map_err(|err| SweepError {
            deleted: 0,
            failed: 0,
            source: err.annotate("ListObjects"),
        })?;

    let mut report = SweepReport {
        listed: objects.len(),
        deleted: 0,
    };
    let mut failed = 0;
    let mut first_error = None;

    for object in objects {
        if clock.elapsed(object.updated) < grace {
            continue;
        }
        let req = DeleteObjectRequest {
            name: object.name.clone(),
            generation: object.generation,
            meta_generation_precondition: None,
        };
        match bucket.delete_object(ctx, req).await {
            Ok(()) => {
                debug!(object = %object.name, "Deleted stale staging object");
                report.deleted += 1;
            }
            Err(err) if err.is_not_found() => report.deleted += 1,
            Err(err) => {
                failed += 1;
                if first_error.is_none() {
                    first_error = Some(err.annotate("DeleteObject"));
                }
            }
        }
    }

    match first_error {
        None => Ok(report),
        Some(source) => Err(SweepError {
            deleted: report.deleted,
            failed,
            source,
        }),
    }
}

/// Background sweeper for one bucket's staging prefix
pub struct GarbageCollector {
    bucket: Arc<dyn Bucket>,
    clock: Arc<dyn Clock>,
    prefix: String,
    interval: Duration,
    grace: Duration,
    token: CancellationToken,
}

impl GarbageCollector {
    pub fn new(
        bucket: Arc<dyn Bucket>,
        clock: Arc<dyn Clock>,
        prefix: impl Into<String>,
        token: CancellationToken,
    ) -> Self {
        GarbageCollector {
            bucket,
            clock,
            prefix: prefix.into(),
            interval: DEFAULT_GC_INTERVAL,
            grace: DEFAULT_GC_GRACE_PERIOD,
            token,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Run on the current runtime until the token is cancelled
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Sweep every interval (first sweep one interval from now) until cancelled.
    pub async fn run(self) {
        let mut tick = interval_at(Instant::now() + self.interval, self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                _ = tick.tick() => self.sweep().await,
            }
        }
        debug!(bucket = self.bucket.name(), "Garbage collector stopped");
    }

    async fn sweep(&self) {
        info!(bucket = self.bucket.name(), "Starting a garbage collection run.");
        let ctx = OpContext::with_token(self.token.child_token());
        match garbage_collect_once(
            &ctx,
            &self.prefix,
            self.bucket.as_ref(),
            self.clock.as_ref(),
            self.grace,
        )
        .await
        {
            Ok(report) => info!(
                bucket = self.bucket.name(),
                listed = report.listed,
                deleted = report.deleted,
                "Garbage collection succeeded"
            ),
            Err(err) => warn!(
                bucket = self.bucket.name(),
                deleted = err.deleted,
                failed = err.failed,
                error = %err.source,
                "Garbage collection failed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimulatedClock;
    use crate::storage::{ErrorKind, InMemoryBucket, SimulatedBucket, SimulatedBucketConfig};
    use std::collections::HashMap;

    const PREFIX: &str = ".gcsfuse_tmp/";

    fn setup() -> (SimulatedClock, InMemoryBucket) {
        let clock = SimulatedClock::default();
        let bucket = InMemoryBucket::new("gc", Arc::new(clock.clone()));
        (clock, bucket)
    }

    #[tokio::test]
    async fn test_deletes_only_stale_staging_objects() {
        let (clock, bucket) = setup();
        let ctx = OpContext::background();

        bucket.put(".gcsfuse_tmp/old", "x", HashMap::new());
        bucket.put("user-file", "x", HashMap::new());
        clock.advance(Duration::from_secs(31 * 60));
        bucket.put(".gcsfuse_tmp/fresh", "x", HashMap::new());

        let report = garbage_collect_once(&ctx, PREFIX, &bucket, &clock, DEFAULT_GC_GRACE_PERIOD)
            .await
            .unwrap();

        assert_eq!(report, SweepReport { listed: 2, deleted: 1 });
        assert_eq!(
            bucket.object_names(),
            vec![".gcsfuse_tmp/fresh".to_string(), "user-file".to_string()]
        );
    }

    #[tokio::test]
    async fn test_refuses_empty_prefix() {
        let (clock, bucket) = setup();
        bucket.put("user-file", "x", HashMap::new());
        clock.advance(Duration::from_secs(3600));

        let err = garbage_collect_once(
            &OpContext::background(),
            "",
            &bucket,
            &clock,
            Duration::ZERO,
        )
        .await
        .unwrap_err();
        assert_eq!(err.source.kind(), ErrorKind::InvalidArgument);
        assert_eq!(bucket.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_failures_are_counted() {
        let (clock, store) = setup();
        store.put(".gcsfuse_tmp/a", "x", HashMap::new());
        store.put(".gcsfuse_tmp/b", "x", HashMap::new());
        clock.advance(Duration::from_secs(3600));
        let bucket = SimulatedBucket::new(
            Arc::new(store.clone()),
            3,
            SimulatedBucketConfig {
                delete_fail_prob: 1.0,
                ..SimulatedBucketConfig::no_faults()
            },
        );

        let err = garbage_collect_once(
            &OpContext::background(),
            PREFIX,
            &bucket,
            &clock,
            DEFAULT_GC_GRACE_PERIOD,
        )
        .await
        .unwrap_err();
        assert_eq!(err.failed, 2);
        assert_eq!(err.deleted, 0);
        assert_eq!(err.source.op_path(), vec!["DeleteObject"]);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_collector_sweeps_on_interval_and_stops() {
        let (clock, bucket) = setup();
        bucket.put(".gcsfuse_tmp/orphan", "x", HashMap::new());
        clock.advance(Duration::from_secs(3600));

        let token = CancellationToken::new();
        let handle = GarbageCollector::new(
            Arc::new(bucket.clone()),
            Arc::new(clock.clone()),
            PREFIX,
            token.clone(),
        )
        .with_interval(Duration::from_secs(60))
        .spawn();

        // Nothing happens before the first interval elapses
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(bucket.len(), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(bucket.is_empty());

        token.cancel();
        handle.await.unwrap();
    }
}
