//! Simulated Bucket with Fault Injection
//!
//! DST wrapper around any [`Bucket`]. Every call rolls a seeded RNG to decide
//! whether to fail before reaching the inner bucket, time out, add latency, or
//! (for mutations) succeed on the inner bucket but report a failure anyway.
//! Two simulated buckets with the same seed and the same call sequence make
//! the same decisions.

use crate::context::OpContext;
use crate::rng::DeterministicRng;
use crate::storage::{
    Bucket, BucketError, BucketFuture, BucketResult, ComposeObjectsRequest, CreateObjectRequest,
    DeleteObjectRequest, Listing, ListObjectsRequest, Object, ObjectContents, ReadObjectRequest,
    StatObjectRequest, UpdateObjectRequest,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for simulated fault injection
#[derive(Debug, Clone)]
pub struct SimulatedBucketConfig {
    pub create_fail_prob: f64,
    pub read_fail_prob: f64,
    pub stat_fail_prob: f64,
    pub list_fail_prob: f64,
    pub update_fail_prob: f64,
    pub delete_fail_prob: f64,
    pub compose_fail_prob: f64,
    /// Probability of a deadline error before the call reaches the store
    pub timeout_prob: f64,
    /// Probability that a mutation is applied but its reply is lost
    pub lost_ack_prob: f64,
    /// Simulated latency range in microseconds (min, max)
    pub latency_range_us: (u64, u64),
}

impl Default for SimulatedBucketConfig {
    fn default() -> Self {
        SimulatedBucketConfig {
            create_fail_prob: 0.01,          // 1%
            read_fail_prob: 0.01,            // 1%
            stat_fail_prob: 0.01,            // 1%
            list_fail_prob: 0.01,            // 1%
            update_fail_prob: 0.01,          // 1%
            delete_fail_prob: 0.01,          // 1%
            compose_fail_prob: 0.01,         // 1%
            timeout_prob: 0.005,             // 0.5%
            lost_ack_prob: 0.002,            // 0.2%
            latency_range_us: (100, 10_000), // 0.1ms - 10ms
        }
    }
}

impl SimulatedBucketConfig {
    /// High chaos configuration for stress testing
    pub fn high_chaos() -> Self {
        SimulatedBucketConfig {
            create_fail_prob: 0.05,
            read_fail_prob: 0.05,
            stat_fail_prob: 0.05,
            list_fail_prob: 0.05,
            update_fail_prob: 0.05,
            delete_fail_prob: 0.05,
            compose_fail_prob: 0.05,
            timeout_prob: 0.02,
            lost_ack_prob: 0.02,
            latency_range_us: (1_000, 100_000),
        }
    }

    /// No faults - for baseline testing
    pub fn no_faults() -> Self {
        SimulatedBucketConfig {
            create_fail_prob: 0.0,
            read_fail_prob: 0.0,
            stat_fail_prob: 0.0,
            list_fail_prob: 0.0,
            update_fail_prob: 0.0,
            delete_fail_prob: 0.0,
            compose_fail_prob: 0.0,
            timeout_prob: 0.0,
            lost_ack_prob: 0.0,
            latency_range_us: (0, 0),
        }
    }
}

/// Statistics for fault injection
#[derive(Debug, Clone, Default)]
pub struct SimulatedBucketStats {
    pub create_attempts: u64,
    pub create_failures: u64,
    pub read_attempts: u64,
    pub read_failures: u64,
    pub stat_attempts: u64,
    pub stat_failures: u64,
    pub list_attempts: u64,
    pub list_failures: u64,
    pub update_attempts: u64,
    pub update_failures: u64,
    pub delete_attempts: u64,
    pub delete_failures: u64,
    pub compose_attempts: u64,
    pub compose_failures: u64,
    pub timeouts: u64,
    pub lost_acks: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimOp {
    Create,
    Read,
    Stat,
    List,
    Update,
    Delete,
    Compose,
}

impl SimOp {
    fn name(self) -> &'static str {
        match self {
            SimOp::Create => "create",
            SimOp::Read => "read",
            SimOp::Stat => "stat",
            SimOp::List => "list",
            SimOp::Update => "update",
            SimOp::Delete => "delete",
            SimOp::Compose => "compose",
        }
    }

    fn is_mutation(self) -> bool {
        matches!(
            self,
            SimOp::Create | SimOp::Update | SimOp::Delete | SimOp::Compose
        )
    }
}

struct SimulatedBucketInner {
    rng: DeterministicRng,
    stats: SimulatedBucketStats,
}

/// What the dice decided for one call
struct Plan {
    latency: Duration,
    lose_ack: bool,
}

/// Simulated bucket that wraps another bucket and injects faults
#[derive(Clone)]
pub struct SimulatedBucket {
    inner: Arc<dyn Bucket>,
    config: SimulatedBucketConfig,
    state: Arc<Mutex<SimulatedBucketInner>>,
}

impl SimulatedBucket {
    pub fn new(inner: Arc<dyn Bucket>, seed: u64, config: SimulatedBucketConfig) -> Self {
        SimulatedBucket {
            inner,
            config,
            state: Arc::new(Mutex::new(SimulatedBucketInner {
                rng: DeterministicRng::new(seed),
                stats: SimulatedBucketStats::default(),
            })),
        }
    }

    /// Get current statistics
    pub fn stats(&self) -> SimulatedBucketStats {
        self.state.lock().stats.clone()
    }

    /// Reset statistics
    pub fn reset_stats(&self) {
        self.state.lock().stats = SimulatedBucketStats::default();
    }

    /// Replace the fault configuration; the RNG stream carries on
    pub fn set_config(&mut self, config: SimulatedBucketConfig) {
        self.config = config;
    }

    fn fail_prob(&self, op: SimOp) -> f64 {
        match op {
            SimOp::Create => self.config.create_fail_prob,
            SimOp::Read => self.config.read_fail_prob,
            SimOp::Stat => self.config.stat_fail_prob,
            SimOp::List => self.config.list_fail_prob,
            SimOp::Update => self.config.update_fail_prob,
            SimOp::Delete => self.config.delete_fail_prob,
            SimOp::Compose => self.config.compose_fail_prob,
        }
    }

    /// Roll every die for one call up front, under a single lock.
    fn plan(&self, op: SimOp) -> BucketResult<Plan> {
        let mut s = self.state.lock();
        let s = &mut *s;
        let (attempts, failures) = match op {
            SimOp::Create => (&mut s.stats.create_attempts, &mut s.stats.create_failures),
            SimOp::Read => (&mut s.stats.read_attempts, &mut s.stats.read_failures),
            SimOp::Stat => (&mut s.stats.stat_attempts, &mut s.stats.stat_failures),
            SimOp::List => (&mut s.stats.list_attempts, &mut s.stats.list_failures),
            SimOp::Update => (&mut s.stats.update_attempts, &mut s.stats.update_failures),
            SimOp::Delete => (&mut s.stats.delete_attempts, &mut s.stats.delete_failures),
            SimOp::Compose => (&mut s.stats.compose_attempts, &mut s.stats.compose_failures),
        };
        *attempts += 1;

        if s.rng.gen_bool(self.config.timeout_prob) {
            s.stats.timeouts += 1;
            return Err(BucketError::DeadlineExceeded);
        }
        if s.rng.gen_bool(self.fail_prob(op)) {
            *failures += 1;
            return Err(BucketError::Other(format!(
                "simulated {} failure",
                op.name()
            )));
        }

        let (min, max) = self.config.latency_range_us;
        let latency = Duration::from_micros(s.rng.gen_range(min, max));
        let lose_ack = op.is_mutation() && s.rng.gen_bool(self.config.lost_ack_prob);
        if lose_ack {
            s.stats.lost_acks += 1;
        }
        Ok(Plan { latency, lose_ack })
    }

    async fn call<'a, T, F>(&'a self, ctx: &'a OpContext, op: SimOp, inner: F) -> BucketResult<T>
    where
        F: std::future::Future<Output = BucketResult<T>> + Send + 'a,
    {
        let plan = self.plan(op)?;
        if !plan.latency.is_zero() {
            ctx.run(async {
                tokio::time::sleep(plan.latency).await;
                Ok(())
            })
            .await?;
        }
        let result = inner.await;
        if plan.lose_ack && result.is_ok() {
            return Err(BucketError::Other(format!(
                "simulated lost reply to {}",
                op.name()
            )));
        }
        result
    }
}

impl Bucket for SimulatedBucket {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn create_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: CreateObjectRequest,
    ) -> BucketFuture<'a, Object> {
        Box::pin(self.call(ctx, SimOp::Create, self.inner.create_object(ctx, req)))
    }

    fn read_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: ReadObjectRequest,
    ) -> BucketFuture<'a, ObjectContents> {
        Box::pin(self.call(ctx, SimOp::Read, self.inner.read_object(ctx, req)))
    }

    fn stat_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: StatObjectRequest,
    ) -> BucketFuture<'a, Object> {
        Box::pin(self.call(ctx, SimOp::Stat, self.inner.stat_object(ctx, req)))
    }

    fn list_objects<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: ListObjectsRequest,
    ) -> BucketFuture<'a, Listing> {
        Box::pin(self.call(ctx, SimOp::List, self.inner.list_objects(ctx, req)))
    }

    fn update_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: UpdateObjectRequest,
    ) -> BucketFuture<'a, Object> {
        Box::pin(self.call(ctx, SimOp::Update, self.inner.update_object(ctx, req)))
    }

    fn delete_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: DeleteObjectRequest,
    ) -> BucketFuture<'a, ()> {
        Box::pin(self.call(ctx, SimOp::Delete, self.inner.delete_object(ctx, req)))
    }

    fn compose_objects<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: ComposeObjectsRequest,
    ) -> BucketFuture<'a, Object> {
        Box::pin(self.call(ctx, SimOp::Compose, self.inner.compose_objects(ctx, req)))
    }
}
