//! Bucket Manager
//!
//! Builds the decorated bucket for each logical bucket, checks that it is
//! usable, and owns the background garbage collectors of every bucket it set
//! up.

use crate::bucket::bandwidth::BandwidthLimitedBucket;
use crate::bucket::config::{BucketConfig, ConfigError};
use crate::bucket::debug::DebugBucket;
use crate::bucket::monitoring::{BucketMetrics, MonitoringBucket};
use crate::bucket::prefix::PrefixBucket;
use crate::bucket::rate_limited::RateLimitedBucket;
use crate::bucket::stat_cache::{CachingBucket, StatCache};
use crate::bucket::throttle::{Throttle, ThrottleError};
use crate::clock::Clock;
use crate::context::OpContext;
use crate::rng::{OsRandom, RandomSource};
use crate::storage::{Bucket, BucketError, ListObjectsRequest, StorageHandle};
use crate::sync::{GarbageCollector, SyncerBucket};
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SetUpBucketError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("rate limiting: {0}")]
    RateLimit(#[from] ThrottleError),

    /// The bucket was built but could not be listed. The handle is still
    /// returned so callers can inspect or retry it.
    #[error("Error in iterating through objects: {source}")]
    Unusable {
        bucket: SyncerBucket,
        #[source]
        source: BucketError,
    },
}

impl SetUpBucketError {
    /// The constructed bucket, if construction got that far
    pub fn bucket(&self) -> Option<&SyncerBucket> {
        match self {
            SetUpBucketError::Unusable { bucket, .. } => Some(bucket),
            _ => None,
        }
    }

    pub fn into_bucket(self) -> Option<SyncerBucket> {
        match self {
            SetUpBucketError::Unusable { bucket, .. } => Some(bucket),
            _ => None,
        }
    }
}

pub struct BucketManager {
    config: BucketConfig,
    clock: Arc<dyn Clock>,
    storage: Arc<dyn StorageHandle>,
    random: Arc<dyn RandomSource>,
    metrics: Arc<BucketMetrics>,
    token: CancellationToken,
    collectors: Mutex<Vec<JoinHandle<()>>>,
}

impl BucketManager {
    pub fn new(config: BucketConfig, clock: Arc<dyn Clock>, storage: Arc<dyn StorageHandle>) -> Self {
        BucketManager {
            config,
            clock,
            storage,
            random: Arc::new(OsRandom),
            metrics: Arc::new(BucketMetrics::new()),
            token: CancellationToken::new(),
            collectors: Mutex::new(Vec::new()),
        }
    }

    /// Draw staging-object names from `random` instead of the OS CSPRNG
    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    pub fn config(&self) -> &BucketConfig {
        &self.config
    }

    /// Metrics recorded by every monitored bucket of this manager
    pub fn metrics(&self) -> &Arc<BucketMetrics> {
        &self.metrics
    }

    /// Build the decorated bucket for `bucket_name` and check that it can be
    /// listed.
    pub async fn set_up_bucket(
        &self,
        ctx: &OpContext,
        bucket_name: &str,
    ) -> Result<SyncerBucket, SetUpBucketError> {
        let config = &self.config;
        config.validate()?;

        let (uncached, bucket) =
            self.decorate(self.storage.bucket_handle(bucket_name, &config.billing_project))?;
        let syncer = SyncerBucket::with_random(
            bucket,
            config.append_threshold,
            config.tmp_object_prefix.clone(),
            self.random.clone(),
        );

        let probe = ListObjectsRequest {
            max_results: 1,
            ..Default::default()
        };
        if let Err(source) = syncer.list_objects(ctx, probe).await {
            warn!(bucket = bucket_name, error = %source, "Bucket is not usable");
            return Err(SetUpBucketError::Unusable {
                bucket: syncer,
                source,
            });
        }

        // Sweeps run below the stat cache
        let collector = GarbageCollector::new(
            uncached,
            self.clock.clone(),
            config.tmp_object_prefix.clone(),
            self.token.child_token(),
        )
        .with_interval(config.gc_interval)
        .with_grace_period(config.tmp_object_grace_period);
        self.collectors.lock().push(collector.spawn());

        info!(bucket = bucket_name, "Set up bucket");
        Ok(syncer)
    }

    /// Wrap a raw bucket in the configured decorators, innermost first.
    /// Returns the stack below the stat cache alongside the full stack.
    fn decorate(
        &self,
        raw: Arc<dyn Bucket>,
    ) -> Result<(Arc<dyn Bucket>, Arc<dyn Bucket>), SetUpBucketError> {
        let config = &self.config;
        let mut bucket = raw;

        if config.debug_gcs {
            bucket = Arc::new(DebugBucket::new(bucket));
        }
        if config.enable_monitoring {
            bucket = Arc::new(MonitoringBucket::new(bucket, self.metrics.clone()));
        }
        if !config.only_dir.is_empty() {
            let scoped = PrefixBucket::for_only_dir(bucket, &config.only_dir);
            debug!(prefix = scoped.prefix(), "Scoping bucket to directory");
            bucket = Arc::new(scoped);
        }
        if config.egress_bandwidth_limit_bytes_per_second > 0.0 {
            let throttle = Throttle::with_rate(config.egress_bandwidth_limit_bytes_per_second)?;
            bucket = Arc::new(BandwidthLimitedBucket::new(bucket, Arc::new(throttle)));
        }
        if config.op_rate_limit_hz > 0.0 {
            let throttle = Throttle::with_rate(config.op_rate_limit_hz)?;
            bucket = Arc::new(RateLimitedBucket::new(bucket, Arc::new(throttle)));
        }
        let uncached = bucket.clone();
        if config.stat_cache_enabled() {
            let cache = StatCache::new(
                config.stat_cache_capacity,
                config.stat_cache_ttl,
                self.clock.clone(),
            );
            bucket = Arc::new(CachingBucket::new(bucket, Arc::new(cache)));
        }
        Ok((uncached, bucket))
    }

    /// Stop every garbage collector and wait for them to finish.
    pub async fn shut_down(&self) {
        self.token.cancel();
        let collectors = std::mem::take(&mut *self.collectors.lock());
        for result in join_all(collectors).await {
            if let Err(err) = result {
                warn!(error = %err, "Garbage collector task failed");
            }
        }
        info!("Bucket manager shut down");
    }
}

impl Drop for BucketManager {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimulatedClock;
    use crate::storage::FakeStorage;

    fn manager(config: BucketConfig) -> (FakeStorage, BucketManager) {
        let clock: Arc<dyn Clock> = Arc::new(SimulatedClock::default());
        let storage = FakeStorage::new(clock.clone());
        let manager = BucketManager::new(config, clock, Arc::new(storage.clone()));
        (storage, manager)
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let (storage, manager) = manager(BucketConfig {
            tmp_object_prefix: String::new(),
            ..BucketConfig::test()
        });
        storage.create_bucket("b");

        let err = manager
            .set_up_bucket(&OpContext::background(), "b")
            .await
            .unwrap_err();
        assert!(matches!(err, SetUpBucketError::Config(_)));
        assert!(err.bucket().is_none());
    }

    #[tokio::test]
    async fn test_unenforceable_rate_is_rejected() {
        // 0.02 * 1e-5 Hz * 8h rounds down to a zero-capacity bucket
        let (storage, manager) = manager(BucketConfig {
            op_rate_limit_hz: 1e-5,
            ..BucketConfig::test()
        });
        storage.create_bucket("b");

        let err = manager
            .set_up_bucket(&OpContext::background(), "b")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SetUpBucketError::RateLimit(ThrottleError::CapacityTooSmall { .. })
        ));
    }

    #[tokio::test]
    async fn test_shut_down_stops_collectors() {
        let (storage, manager) = manager(BucketConfig::test());
        storage.create_bucket("b");

        manager
            .set_up_bucket(&OpContext::background(), "b")
            .await
            .unwrap();
        assert_eq!(manager.collectors.lock().len(), 1);

        manager.shut_down().await;
        assert!(manager.collectors.lock().is_empty());
    }
}
