//! Append-via-compose object creator
//!
//! The new tail is uploaded as a staging object, then composed onto the
//! source generation in place. The destination preconditions on the compose
//! make a concurrent overwrite fail cleanly. The staging object is deleted on
//! every exit path: after the compose (success or not) with a detached
//! context, and from `Drop` if the whole future is abandoned mid-flight.

use crate::context::OpContext;
use crate::rng::RandomSource;
use crate::storage::{
    Annotate, Bucket, BucketError, BucketFuture, BucketResult, ComposeObjectsRequest,
    ComposeSource, CreateObjectRequest, DeleteObjectRequest, Object, ObjectContents,
};
use crate::sync::creator::{merged_metadata, ObjectCreator};
use crate::sync::temp_name::TempNameGenerator;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Upper bound on how long staging-object cleanup may take
pub const CLEANUP_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Appends by composing a staged tail onto the source object.
///
/// `object_name` is ignored; the destination is always `src.name`.
#[derive(Clone)]
pub struct AppendObjectCreator {
    bucket: Arc<dyn Bucket>,
    names: TempNameGenerator,
}

impl AppendObjectCreator {
    pub fn new(bucket: Arc<dyn Bucket>, prefix: impl Into<String>) -> Self {
        AppendObjectCreator {
            bucket,
            names: TempNameGenerator::with_os_random(prefix),
        }
    }

    pub fn with_random(
        bucket: Arc<dyn Bucket>,
        prefix: impl Into<String>,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        AppendObjectCreator {
            bucket,
            names: TempNameGenerator::new(prefix, random),
        }
    }

    pub fn prefix(&self) -> &str {
        self.names.prefix()
    }

    async fn append(
        &self,
        ctx: &OpContext,
        src: &Object,
        mtime: Option<DateTime<Utc>>,
        contents: ObjectContents,
    ) -> BucketResult<Object> {
        let tmp_name = self.names.choose_name()?;

        let mut req = CreateObjectRequest::new(tmp_name, contents);
        req.generation_precondition = Some(0);
        let tmp = self
            .bucket
            .create_object(ctx, req)
            .await
            .annotate("CreateObject")?;

        let mut guard = TempObjectGuard::new(self.bucket.clone(), tmp.name.clone());
        let composed = self.compose(ctx, src, &tmp, mtime).await;
        let cleanup = guard.delete().await;
        merge_cleanup(composed, cleanup)
    }

    async fn compose(
        &self,
        ctx: &OpContext,
        src: &Object,
        tmp: &Object,
        mtime: Option<DateTime<Utc>>,
    ) -> BucketResult<Object> {
        let req = ComposeObjectsRequest {
            dst_name: src.name.clone(),
            dst_generation_precondition: Some(src.generation),
            dst_meta_generation_precondition: Some(src.meta_generation),
            sources: vec![
                ComposeSource::new(src.name.clone(), src.generation),
                ComposeSource::new(tmp.name.clone(), tmp.generation),
            ],
            metadata: merged_metadata(Some(src), mtime),
            attrs: src.attrs.clone(),
        };

        // A missing source means the destination (or, improbably, the staging
        // object) was replaced underneath us.
        self.bucket
            .compose_objects(ctx, req)
            .await
            .map_err(|err| {
                if err.is_not_found() {
                    err.clobbered()
                } else {
                    err
                }
            })
            .annotate("ComposeObjects")
    }
}

impl ObjectCreator for AppendObjectCreator {
    fn create<'a>(
        &'a self,
        ctx: &'a OpContext,
        _object_name: &'a str,
        src: Option<&'a Object>,
        mtime: Option<DateTime<Utc>>,
        contents: ObjectContents,
    ) -> BucketFuture<'a, Object> {
        Box::pin(async move {
            let Some(src) = src else {
                return Err(BucketError::InvalidArgument(
                    "append requires an existing source object".to_string(),
                ));
            };
            self.append(ctx, src, mtime, contents).await
        })
    }
}

/// Combine an operation's result with its cleanup's result.
///
/// The primary outcome wins; a cleanup failure is either attached to the
/// primary error or, when the operation succeeded, returned on its own.
pub fn merge_cleanup<T>(result: BucketResult<T>, cleanup: BucketResult<()>) -> BucketResult<T> {
    match (result, cleanup) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(cleanup)) => Err(cleanup.annotate("DeleteObject")),
        (Err(primary), Ok(())) => Err(primary),
        (Err(primary), Err(cleanup)) => {
            Err(primary.with_cleanup_failure(cleanup.annotate("DeleteObject")))
        }
    }
}

/// Owns one staging object until it is deleted.
struct TempObjectGuard {
    bucket: Arc<dyn Bucket>,
    name: String,
    armed: bool,
}

impl TempObjectGuard {
    fn new(bucket: Arc<dyn Bucket>, name: String) -> Self {
        TempObjectGuard {
            bucket,
            name,
            armed: true,
        }
    }

    /// Delete the latest generation, independent of the caller's context.
    async fn delete(&mut self) -> BucketResult<()> {
        let result = delete_detached(self.bucket.as_ref(), &self.name).await;
        self.armed = false;
        if let Err(err) = &result {
            warn!(object = %self.name, error = %err, "Failed to delete staging object");
        }
        result
    }
}

impl Drop for TempObjectGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(object = %self.name, "No runtime to delete abandoned staging object");
            return;
        };
        let bucket = self.bucket.clone();
        let name = std::mem::take(&mut self.name);
        debug!(object = %name, "Deleting staging object of abandoned append");
        handle.spawn(async move {
            if let Err(err) = delete_detached(bucket.as_ref(), &name).await {
                warn!(object = %name, error = %err, "Failed to delete staging object");
            }
        });
    }
}

async fn delete_detached(bucket: &dyn Bucket, name: &str) -> BucketResult<()> {
    let ctx = OpContext::detached(CLEANUP_GRACE_PERIOD);
    ctx.run(bucket.delete_object(&ctx, DeleteObjectRequest::latest(name)))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimulatedClock;
    use crate::rng::FixedRandom;
    use crate::storage::{contents_from, ErrorKind, InMemoryBucket};
    use std::collections::HashMap;

    const PREFIX: &str = ".gcsfuse_tmp/";

    fn setup() -> (InMemoryBucket, AppendObjectCreator) {
        let bucket = InMemoryBucket::new("append", Arc::new(SimulatedClock::default()));
        let creator = AppendObjectCreator::new(Arc::new(bucket.clone()), PREFIX);
        (bucket, creator)
    }

    fn staged(bucket: &InMemoryBucket) -> Vec<String> {
        bucket
            .object_names()
            .into_iter()
            .filter(|n| n.starts_with(PREFIX))
            .collect()
    }

    #[test]
    fn test_merge_cleanup() {
        let ok: BucketResult<u32> = Ok(1);
        assert_eq!(merge_cleanup(ok, Ok(())).unwrap(), 1);

        let err = merge_cleanup(Ok(1), Err(BucketError::Other("x".into()))).unwrap_err();
        assert_eq!(err.op_path(), vec!["DeleteObject"]);

        let primary: BucketResult<u32> = Err(BucketError::Precondition("gen".into()));
        let err = merge_cleanup(primary, Ok(())).unwrap_err();
        assert!(err.is_precondition());
        assert!(err.cleanup_failure().is_none());

        let primary: BucketResult<u32> = Err(BucketError::Precondition("gen".into()));
        let err = merge_cleanup(primary, Err(BucketError::Other("x".into()))).unwrap_err();
        assert!(err.is_precondition());
        assert_eq!(err.cleanup_failure().unwrap().op_path(), vec!["DeleteObject"]);
    }

    #[tokio::test]
    async fn test_append_happy_path() {
        let (bucket, creator) = setup();
        let ctx = OpContext::background();
        let src = bucket.put("f", "taco", HashMap::new());

        let o = creator
            .create(&ctx, "ignored", Some(&src), None, contents_from("burrito"))
            .await
            .unwrap();

        assert_eq!(o.name, "f");
        assert!(o.generation > src.generation);
        assert_eq!(o.component_count, 2);
        assert_eq!(bucket.contents("f").unwrap(), "tacoburrito");
        assert!(staged(&bucket).is_empty());
    }

    #[tokio::test]
    async fn test_append_requires_source() {
        let (bucket, creator) = setup();
        let ctx = OpContext::background();

        let err = creator
            .create(&ctx, "f", None, None, contents_from("x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(bucket.is_empty());
    }

    #[tokio::test]
    async fn test_clobbered_source_is_precondition_error() {
        let (bucket, creator) = setup();
        let ctx = OpContext::background();
        let src = bucket.put("f", "taco", HashMap::new());
        bucket.put("f", "someone else", HashMap::new());

        let err = creator
            .create(&ctx, "f", Some(&src), None, contents_from("burrito"))
            .await
            .unwrap_err();

        assert!(err.is_precondition());
        assert_eq!(err.op_path(), vec!["ComposeObjects"]);
        assert_eq!(bucket.contents("f").unwrap(), "someone else");
        assert!(staged(&bucket).is_empty());
    }

    #[tokio::test]
    async fn test_staging_collision_is_create_error() {
        let bucket = InMemoryBucket::new("append", Arc::new(SimulatedClock::default()));
        let creator =
            AppendObjectCreator::with_random(Arc::new(bucket.clone()), PREFIX, Arc::new(FixedRandom(1)));
        let ctx = OpContext::background();
        let src = bucket.put("f", "taco", HashMap::new());
        bucket.put(".gcsfuse_tmp/0000000000000001", "squatter", HashMap::new());

        let err = creator
            .create(&ctx, "f", Some(&src), None, contents_from("burrito"))
            .await
            .unwrap_err();

        assert!(err.is_precondition());
        assert_eq!(err.op_path(), vec!["CreateObject"]);
        assert_eq!(bucket.contents("f").unwrap(), "taco");
        // The squatter is not ours to delete
        assert_eq!(
            bucket.contents(".gcsfuse_tmp/0000000000000001").unwrap(),
            "squatter"
        );
    }

    #[tokio::test]
    async fn test_abandoned_append_deletes_staging_object() {
        let (bucket, _) = setup();
        bucket.put(".gcsfuse_tmp/abandoned", "tail", HashMap::new());

        let guard = TempObjectGuard::new(
            Arc::new(bucket.clone()),
            ".gcsfuse_tmp/abandoned".to_string(),
        );
        drop(guard);

        for _ in 0..100 {
            if staged(&bucket).is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(staged(&bucket).is_empty());
    }
}
