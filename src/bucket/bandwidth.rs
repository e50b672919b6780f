//! Egress bandwidth limiting decorator
//!
//! Bytes flowing through `create_object` uploads and `read_object` streams
//! are charged against a shared byte-rate [`Throttle`]. Calls that move no
//! object content pass straight through.

use crate::bucket::throttle::Throttle;
use crate::context::OpContext;
use crate::storage::{
    Bucket, BucketFuture, BucketResult, ComposeObjectsRequest, CreateObjectRequest,
    DeleteObjectRequest, Listing, ListObjectsRequest, Object, ObjectContents, ReadObjectRequest,
    StatObjectRequest, UpdateObjectRequest,
};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

type Permit = Pin<Box<dyn Future<Output = BucketResult<usize>> + Send>>;

/// Reader that waits for byte tokens before each read.
///
/// Tokens are granted ahead of a read, sized to the caller's buffer. Any
/// still unread at end of stream, or when the reader is dropped, go back to
/// the throttle, so a stream is charged exactly the bytes it moved.
///
/// A throttle failure (cancellation, deadline) surfaces as an `io::Error`
/// wrapping the original `BucketError`, which converts back losslessly.
pub struct ThrottledReader<R> {
    inner: R,
    throttle: Arc<Throttle>,
    ctx: OpContext,
    permit: Option<Permit>,
    /// Bytes already paid for but not yet read
    granted: usize,
}

impl<R> ThrottledReader<R> {
    pub fn new(inner: R, throttle: Arc<Throttle>, ctx: OpContext) -> Self {
        ThrottledReader {
            inner,
            throttle,
            ctx,
            permit: None,
            granted: 0,
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ThrottledReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        if this.granted == 0 {
            if this.permit.is_none() {
                let capacity = usize::try_from(this.throttle.capacity()).unwrap_or(usize::MAX);
                let want = buf.remaining().min(capacity).max(1);
                let throttle = this.throttle.clone();
                let ctx = this.ctx.clone();
                this.permit = Some(Box::pin(async move {
                    throttle.wait(&ctx, want as u64).await?;
                    Ok(want)
                }));
            }
            if let Some(permit) = this.permit.as_mut() {
                let result = ready!(permit.as_mut().poll(cx));
                this.permit = None;
                match result {
                    Ok(granted) => this.granted = granted,
                    Err(err) => {
                        return Poll::Ready(Err(io::Error::other(err)))
                    }
                }
            }
        }

        let limit = this.granted.min(buf.remaining());
        let mut limited = ReadBuf::new(buf.initialize_unfilled_to(limit));
        ready!(Pin::new(&mut this.inner).poll_read(cx, &mut limited))?;
        let n = limited.filled().len();
        buf.advance(n);
        this.granted -= n;
        if n == 0 {
            this.release_grant();
        }
        Poll::Ready(Ok(()))
    }
}

impl<R> ThrottledReader<R> {
    fn release_grant(&mut self) {
        if self.granted > 0 {
            self.throttle.refund(self.granted as u64);
            self.granted = 0;
        }
    }
}

impl<R> Drop for ThrottledReader<R> {
    fn drop(&mut self) {
        self.release_grant();
    }
}

/// Charges object content bytes against a shared bandwidth throttle.
pub struct BandwidthLimitedBucket {
    inner: Arc<dyn Bucket>,
    throttle: Arc<Throttle>,
}

impl BandwidthLimitedBucket {
    pub fn new(inner: Arc<dyn Bucket>, throttle: Arc<Throttle>) -> Self {
        BandwidthLimitedBucket { inner, throttle }
    }
}

impl Bucket for BandwidthLimitedBucket {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn create_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        mut req: CreateObjectRequest,
    ) -> BucketFuture<'a, Object> {
        req.contents = Box::new(ThrottledReader::new(
            req.contents,
            self.throttle.clone(),
            ctx.clone(),
        ));
        self.inner.create_object(ctx, req)
    }

    fn read_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: ReadObjectRequest,
    ) -> BucketFuture<'a, ObjectContents> {
        Box::pin(async move {
            let reader = self.inner.read_object(ctx, req).await?;
            let throttled: ObjectContents = Box::new(ThrottledReader::new(
                reader,
                self.throttle.clone(),
                ctx.clone(),
            ));
            Ok(throttled)
        })
    }

    fn stat_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: StatObjectRequest,
    ) -> BucketFuture<'a, Object> {
        self.inner.stat_object(ctx, req)
    }

    fn list_objects<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: ListObjectsRequest,
    ) -> BucketFuture<'a, Listing> {
        self.inner.list_objects(ctx, req)
    }

    fn update_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: UpdateObjectRequest,
    ) -> BucketFuture<'a, Object> {
        self.inner.update_object(ctx, req)
    }

    fn delete_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: DeleteObjectRequest,
    ) -> BucketFuture<'a, ()> {
        self.inner.delete_object(ctx, req)
    }

    fn compose_objects<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: ComposeObjectsRequest,
    ) -> BucketFuture<'a, Object> {
        self.inner.compose_objects(ctx, req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimulatedClock;
    use crate::storage::{contents_from, ErrorKind, InMemoryBucket};
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::time::Instant;

    fn setup(rate: f64, capacity: u64) -> (InMemoryBucket, BandwidthLimitedBucket) {
        let store = InMemoryBucket::new("bw", Arc::new(SimulatedClock::default()));
        let throttle = Arc::new(Throttle::new(rate, capacity).unwrap());
        let bucket = BandwidthLimitedBucket::new(Arc::new(store.clone()), throttle);
        (store, bucket)
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_is_paced() {
        let (store, bucket) = setup(1000.0, 1000);
        store.put("big", vec![7u8; 3000], Default::default());
        let ctx = OpContext::background();
        let start = Instant::now();

        let mut reader = bucket
            .read_object(&ctx, ReadObjectRequest::latest("big"))
            .await
            .unwrap();
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await.unwrap();

        assert_eq!(data.len(), 3000);
        // First 1000 bytes from the initial burst, the rest at 1000 B/s
        let elapsed = Instant::now() - start;
        assert!(elapsed >= Duration::from_millis(1980), "elapsed {:?}", elapsed);
        assert!(elapsed <= Duration::from_millis(2050), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_is_paced() {
        let (store, bucket) = setup(500.0, 500);
        let ctx = OpContext::background();
        let start = Instant::now();

        bucket
            .create_object(
                &ctx,
                CreateObjectRequest::new("up", contents_from(vec![1u8; 1500])),
            )
            .await
            .unwrap();

        assert_eq!(store.contents("up").unwrap().len(), 1500);
        let elapsed = Instant::now() - start;
        assert!(elapsed >= Duration::from_millis(1980), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_is_charged_its_size() {
        let store = InMemoryBucket::new("bw", Arc::new(SimulatedClock::default()));
        let throttle = Arc::new(Throttle::new(1.0, 1000).unwrap());
        let bucket = BandwidthLimitedBucket::new(Arc::new(store.clone()), throttle.clone());

        bucket
            .create_object(
                &OpContext::background(),
                CreateObjectRequest::new("small", contents_from("hello")),
            )
            .await
            .unwrap();

        let available = throttle.available();
        assert!((available - 995.0).abs() < 1e-6, "available {}", available);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_read_returns_unread_grant() {
        let store = InMemoryBucket::new("bw", Arc::new(SimulatedClock::default()));
        store.put("obj", "abcd", Default::default());
        let throttle = Arc::new(Throttle::new(1.0, 1000).unwrap());
        let bucket = BandwidthLimitedBucket::new(Arc::new(store), throttle.clone());
        let ctx = OpContext::background();

        let mut reader = bucket
            .read_object(&ctx, ReadObjectRequest::latest("obj"))
            .await
            .unwrap();
        // 10 tokens granted for the buffer, 4 bytes delivered
        let mut buf = [0u8; 10];
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(n, 4);
        drop(reader);

        let available = throttle.available();
        assert!((available - 996.0).abs() < 1e-6, "available {}", available);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_during_upload_keeps_error_kind() {
        let (store, bucket) = setup(100.0, 100);
        let ctx = OpContext::background().with_timeout(Duration::from_millis(500));

        let err = bucket
            .create_object(
                &ctx,
                CreateObjectRequest::new("up", contents_from(vec![1u8; 1000])),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
        assert!(store.is_empty());
    }
}
