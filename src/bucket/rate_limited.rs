//! Operation-rate limiting decorator

use crate::bucket::throttle::Throttle;
use crate::context::OpContext;
use crate::storage::{
    Bucket, BucketFuture, ComposeObjectsRequest, CreateObjectRequest, DeleteObjectRequest,
    Listing, ListObjectsRequest, Object, ObjectContents, ReadObjectRequest, StatObjectRequest,
    UpdateObjectRequest,
};
use std::sync::Arc;

/// Admits each call through a shared op-rate throttle before delegating.
pub struct RateLimitedBucket {
    inner: Arc<dyn Bucket>,
    throttle: Arc<Throttle>,
}

impl RateLimitedBucket {
    pub fn new(inner: Arc<dyn Bucket>, throttle: Arc<Throttle>) -> Self {
        RateLimitedBucket { inner, throttle }
    }
}

macro_rules! rate_limited {
    ($self:ident, $ctx:ident, $call:expr) => {
        Box::pin(async move {
            $self.throttle.wait($ctx, 1).await?;
            $call.await
        })
    };
}

impl Bucket for RateLimitedBucket {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn create_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: CreateObjectRequest,
    ) -> BucketFuture<'a, Object> {
        rate_limited!(self, ctx, self.inner.create_object(ctx, req))
    }

    fn read_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: ReadObjectRequest,
    ) -> BucketFuture<'a, ObjectContents> {
        rate_limited!(self, ctx, self.inner.read_object(ctx, req))
    }

    fn stat_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: StatObjectRequest,
    ) -> BucketFuture<'a, Object> {
        rate_limited!(self, ctx, self.inner.stat_object(ctx, req))
    }

    fn list_objects<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: ListObjectsRequest,
    ) -> BucketFuture<'a, Listing> {
        rate_limited!(self, ctx, self.inner.list_objects(ctx, req))
    }

    fn update_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: UpdateObjectRequest,
    ) -> BucketFuture<'a, Object> {
        rate_limited!(self, ctx, self.inner.update_object(ctx, req))
    }

    fn delete_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: DeleteObjectRequest,
    ) -> BucketFuture<'a, ()> {
        rate_limited!(self, ctx, self.inner.delete_object(ctx, req))
    }

    fn compose_objects<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: ComposeObjectsRequest,
    ) -> BucketFuture<'a, Object> {
        rate_limited!(self, ctx, self.inner.compose_objects(ctx, req))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimulatedClock;
    use crate::storage::InMemoryBucket;
    use std::time::Duration;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_calls_are_paced() {
        let store = InMemoryBucket::new("rl", Arc::new(SimulatedClock::default()));
        store.put("o", "x", Default::default());
        let throttle = Arc::new(Throttle::new(2.0, 1).unwrap());
        let bucket = RateLimitedBucket::new(Arc::new(store), throttle);
        let ctx = OpContext::background();
        let start = Instant::now();

        for _ in 0..5 {
            bucket
                .stat_object(&ctx, StatObjectRequest::new("o"))
                .await
                .unwrap();
        }

        // One from the initial burst, then four at 2 Hz
        let elapsed = Instant::now() - start;
        assert!(elapsed >= Duration::from_millis(1990), "elapsed {:?}", elapsed);
        assert!(elapsed <= Duration::from_millis(2010), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_while_waiting() {
        let store = InMemoryBucket::new("rl", Arc::new(SimulatedClock::default()));
        let throttle = Arc::new(Throttle::new(0.1, 1).unwrap());
        let bucket = RateLimitedBucket::new(Arc::new(store), throttle);
        let ctx = OpContext::background();

        bucket
            .list_objects(&ctx, ListObjectsRequest::default())
            .await
            .unwrap();

        let short = ctx.with_timeout(Duration::from_secs(1));
        let err = bucket
            .list_objects(&short, ListObjectsRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::storage::ErrorKind::DeadlineExceeded);
    }
}
