//! Per-method bucket metrics
//!
//! [`MonitoringBucket`] counts requests, errors, and cumulative latency for
//! every call, keyed by bucket name and method, in a [`BucketMetrics`]
//! registry shared by all buckets of a manager.

use crate::context::OpContext;
use crate::storage::{
    Bucket, BucketFuture, BucketResult, ComposeObjectsRequest, CreateObjectRequest,
    DeleteObjectRequest, Listing, ListObjectsRequest, Object, ObjectContents, ReadObjectRequest,
    StatObjectRequest, UpdateObjectRequest,
};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Counters for one (bucket, method) pair
#[derive(Debug, Default)]
pub struct MethodStats {
    requests: AtomicU64,
    errors: AtomicU64,
    total_latency_us: AtomicU64,
}

impl MethodStats {
    fn record(&self, latency: Duration, failed: bool) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.total_latency_us.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn total_latency(&self) -> Duration {
        Duration::from_micros(self.total_latency_us.load(Ordering::Relaxed))
    }
}

/// Point-in-time copy of one counter set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodSnapshot {
    pub bucket: String,
    pub method: &'static str,
    pub requests: u64,
    pub errors: u64,
    pub total_latency_us: u64,
}

/// Registry of per-bucket, per-method counters
#[derive(Debug, Default)]
pub struct BucketMetrics {
    methods: RwLock<HashMap<(String, &'static str), Arc<MethodStats>>>,
}

impl BucketMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters for `method` on `bucket`, created on first use
    pub fn method(&self, bucket: &str, method: &'static str) -> Arc<MethodStats> {
        if let Some(stats) = self.methods.read().get(&(bucket.to_string(), method)) {
            return stats.clone();
        }
        self.methods
            .write()
            .entry((bucket.to_string(), method))
            .or_default()
            .clone()
    }

    /// Every counter set, sorted by bucket then method
    pub fn snapshot(&self) -> Vec<MethodSnapshot> {
        let mut snapshot: Vec<_> = self
            .methods
            .read()
            .iter()
            .map(|((bucket, method), stats)| MethodSnapshot {
                bucket: bucket.clone(),
                method: *method,
                requests: stats.requests(),
                errors: stats.errors(),
                total_latency_us: stats.total_latency_us.load(Ordering::Relaxed),
            })
            .collect();
        snapshot.sort_by(|a, b| (&a.bucket, a.method).cmp(&(&b.bucket, b.method)));
        snapshot
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.snapshot())
    }
}

/// Records every call into a shared [`BucketMetrics`].
pub struct MonitoringBucket {
    inner: Arc<dyn Bucket>,
    metrics: Arc<BucketMetrics>,
}

impl MonitoringBucket {
    pub fn new(inner: Arc<dyn Bucket>, metrics: Arc<BucketMetrics>) -> Self {
        MonitoringBucket { inner, metrics }
    }

    fn observe<'a, T, F>(&'a self, method: &'static str, call: F) -> BucketFuture<'a, T>
    where
        T: Send + 'a,
        F: Future<Output = BucketResult<T>> + Send + 'a,
    {
        let stats = self.metrics.method(self.inner.name(), method);
        Box::pin(async move {
            let start = Instant::now();
            let result = call.await;
            stats.record(start.elapsed(), result.is_err());
            result
        })
    }
}

impl Bucket for MonitoringBucket {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn create_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: CreateObjectRequest,
    ) -> BucketFuture<'a, Object> {
        self.observe("CreateObject", self.inner.create_object(ctx, req))
    }

    fn read_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: ReadObjectRequest,
    ) -> BucketFuture<'a, ObjectContents> {
        self.observe("NewReader", self.inner.read_object(ctx, req))
    }

    fn stat_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: StatObjectRequest,
    ) -> BucketFuture<'a, Object> {
        self.observe("StatObject", self.inner.stat_object(ctx, req))
    }

    fn list_objects<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: ListObjectsRequest,
    ) -> BucketFuture<'a, Listing> {
        self.observe("ListObjects", self.inner.list_objects(ctx, req))
    }

    fn update_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: UpdateObjectRequest,
    ) -> BucketFuture<'a, Object> {
        self.observe("UpdateObject", self.inner.update_object(ctx, req))
    }

    fn delete_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: DeleteObjectRequest,
    ) -> BucketFuture<'a, ()> {
        self.observe("DeleteObject", self.inner.delete_object(ctx, req))
    }

    fn compose_objects<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: ComposeObjectsRequest,
    ) -> BucketFuture<'a, Object> {
        self.observe("ComposeObjects", self.inner.compose_objects(ctx, req))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimulatedClock;
    use crate::storage::{contents_from, InMemoryBucket};

    #[tokio::test]
    async fn test_counts_requests_and_errors() {
        let store = InMemoryBucket::new("mon", Arc::new(SimulatedClock::default()));
        let metrics = Arc::new(BucketMetrics::new());
        let bucket = MonitoringBucket::new(Arc::new(store), metrics.clone());
        let ctx = OpContext::background();

        bucket
            .create_object(&ctx, CreateObjectRequest::new("a", contents_from("x")))
            .await
            .unwrap();
        bucket
            .stat_object(&ctx, StatObjectRequest::new("a"))
            .await
            .unwrap();
        bucket
            .stat_object(&ctx, StatObjectRequest::new("missing"))
            .await
            .unwrap_err();

        let stat = metrics.method("mon", "StatObject");
        assert_eq!(stat.requests(), 2);
        assert_eq!(stat.errors(), 1);
        assert_eq!(metrics.method("mon", "CreateObject").requests(), 1);

        let snapshot = metrics.snapshot();
        let methods: Vec<_> = snapshot.iter().map(|s| s.method).collect();
        assert_eq!(methods, vec!["CreateObject", "StatObject"]);
    }

    #[test]
    fn test_json_snapshot() {
        let metrics = BucketMetrics::new();
        metrics
            .method("b", "ListObjects")
            .record(Duration::from_micros(250), false);

        let json: serde_json::Value = serde_json::from_str(&metrics.to_json().unwrap()).unwrap();
        assert_eq!(json[0]["bucket"], "b");
        assert_eq!(json[0]["method"], "ListObjects");
        assert_eq!(json[0]["requests"], 1);
        assert_eq!(json[0]["total_latency_us"], 250);
    }
}
