//! Request logging decorator
//!
//! Logs each call on entry and on completion at `debug` level, tagged with a
//! per-bucket request id so interleaved requests can be told apart.

use crate::context::OpContext;
use crate::storage::{
    Bucket, BucketFuture, BucketResult, ComposeObjectsRequest, CreateObjectRequest,
    DeleteObjectRequest, Listing, ListObjectsRequest, Object, ObjectContents, ReadObjectRequest,
    StatObjectRequest, UpdateObjectRequest,
};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

pub struct DebugBucket {
    inner: Arc<dyn Bucket>,
    next_request_id: AtomicU64,
}

impl DebugBucket {
    pub fn new(inner: Arc<dyn Bucket>) -> Self {
        DebugBucket {
            inner,
            next_request_id: AtomicU64::new(0),
        }
    }

    fn trace<'a, T, F>(&'a self, desc: String, call: F) -> BucketFuture<'a, T>
    where
        T: Send + 'a,
        F: Future<Output = BucketResult<T>> + Send + 'a,
    {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        Box::pin(async move {
            debug!(bucket = self.inner.name(), "Req {:#x}: <- {}", id, desc);
            let start = Instant::now();
            let result = call.await;
            match &result {
                Ok(_) => debug!(
                    bucket = self.inner.name(),
                    "Req {:#x}: -> {} ({:?}): OK",
                    id,
                    desc,
                    start.elapsed()
                ),
                Err(err) => debug!(
                    bucket = self.inner.name(),
                    "Req {:#x}: -> {} ({:?}): {}",
                    id,
                    desc,
                    start.elapsed(),
                    err
                ),
            }
            result
        })
    }
}

impl Bucket for DebugBucket {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn create_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: CreateObjectRequest,
    ) -> BucketFuture<'a, Object> {
        let desc = format!("CreateObject({:?})", req.name);
        self.trace(desc, self.inner.create_object(ctx, req))
    }

    fn read_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: ReadObjectRequest,
    ) -> BucketFuture<'a, ObjectContents> {
        let desc = match req.range {
            Some(range) => format!("Read({:?}, [{}, {}))", req.name, range.start, range.limit),
            None => format!("Read({:?})", req.name),
        };
        self.trace(desc, self.inner.read_object(ctx, req))
    }

    fn stat_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: StatObjectRequest,
    ) -> BucketFuture<'a, Object> {
        let desc = format!("StatObject({:?})", req.name);
        self.trace(desc, self.inner.stat_object(ctx, req))
    }

    fn list_objects<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: ListObjectsRequest,
    ) -> BucketFuture<'a, Listing> {
        let desc = format!("ListObjects({:?})", req.prefix);
        self.trace(desc, self.inner.list_objects(ctx, req))
    }

    fn update_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: UpdateObjectRequest,
    ) -> BucketFuture<'a, Object> {
        let desc = format!("UpdateObject({:?})", req.name);
        self.trace(desc, self.inner.update_object(ctx, req))
    }

    fn delete_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: DeleteObjectRequest,
    ) -> BucketFuture<'a, ()> {
        let desc = format!("DeleteObject({:?})", req.name);
        self.trace(desc, self.inner.delete_object(ctx, req))
    }

    fn compose_objects<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: ComposeObjectsRequest,
    ) -> BucketFuture<'a, Object> {
        let sources: Vec<&str> = req.sources.iter().map(|s| s.name.as_str()).collect();
        let desc = format!("ComposeObjects({:?}, {:?})", req.dst_name, sources);
        self.trace(desc, self.inner.compose_objects(ctx, req))
    }
}
