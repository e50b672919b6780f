//! Syncer bucket
//!
//! The fully decorated bucket handed to the filesystem layer, plus the logic
//! that commits a dirty local file back to its object.

use crate::context::OpContext;
use crate::rng::RandomSource;
use crate::storage::{
    contents_from, Annotate, Bucket, BucketError, BucketFuture, BucketResult,
    ComposeObjectsRequest, CreateObjectRequest, DeleteObjectRequest, Listing, ListObjectsRequest,
    Object, ObjectContents, ReadObjectRequest, StatObjectRequest, UpdateObjectRequest,
};
use crate::sync::append_creator::AppendObjectCreator;
use crate::sync::creator::{choose_creator, CreatorKind, ObjectCreator};
use crate::sync::full_creator::FullObjectCreator;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Local state of a file being synced
#[derive(Debug, Clone)]
pub struct LocalContent {
    /// Complete current content
    pub data: Bytes,
    /// Offset of the first byte that may differ from the remote object
    pub dirty_threshold: u64,
    pub mtime: Option<DateTime<Utc>>,
}

impl LocalContent {
    /// Content with nothing in common with the remote object
    pub fn new(data: impl Into<Bytes>) -> Self {
        LocalContent {
            data: data.into(),
            dirty_threshold: 0,
            mtime: None,
        }
    }

    pub fn with_dirty_threshold(mut self, dirty_threshold: u64) -> Self {
        self.dirty_threshold = dirty_threshold;
        self
    }

    pub fn with_mtime(mut self, mtime: DateTime<Utc>) -> Self {
        self.mtime = Some(mtime);
        self
    }
}

/// Decorated bucket that also knows how to sync file content
#[derive(Clone)]
pub struct SyncerBucket {
    bucket: Arc<dyn Bucket>,
    append_threshold: u64,
    full_creator: FullObjectCreator,
    append_creator: AppendObjectCreator,
}

impl fmt::Debug for SyncerBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncerBucket")
            .field("name", &self.bucket.name())
            .field("append_threshold", &self.append_threshold)
            .field("tmp_object_prefix", &self.append_creator.prefix())
            .finish()
    }
}

impl SyncerBucket {
    pub fn new(
        bucket: Arc<dyn Bucket>,
        append_threshold: u64,
        tmp_object_prefix: impl Into<String>,
    ) -> Self {
        SyncerBucket {
            full_creator: FullObjectCreator::new(bucket.clone()),
            append_creator: AppendObjectCreator::new(bucket.clone(), tmp_object_prefix),
            bucket,
            append_threshold,
        }
    }

    /// Like [`SyncerBucket::new`], drawing staging names from `random`
    pub fn with_random(
        bucket: Arc<dyn Bucket>,
        append_threshold: u64,
        tmp_object_prefix: impl Into<String>,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        SyncerBucket {
            full_creator: FullObjectCreator::new(bucket.clone()),
            append_creator: AppendObjectCreator::with_random(
                bucket.clone(),
                tmp_object_prefix,
                random,
            ),
            bucket,
            append_threshold,
        }
    }

    /// The decorated bucket underneath
    pub fn inner(&self) -> &Arc<dyn Bucket> {
        &self.bucket
    }

    pub fn append_threshold(&self) -> u64 {
        self.append_threshold
    }

    pub fn tmp_object_prefix(&self) -> &str {
        self.append_creator.prefix()
    }

    /// Commit `content` as a new generation of `file_name`.
    ///
    /// `src` is the snapshot the local content was based on (`None` for a file
    /// that has never been synced). A precondition error means someone else
    /// wrote the object since; it is returned unannotated so the caller can
    /// re-read and retry. Other errors are annotated `Create`.
    pub async fn sync_object(
        &self,
        ctx: &OpContext,
        file_name: &str,
        src: Option<&Object>,
        content: &LocalContent,
    ) -> BucketResult<Object> {
        if content.dirty_threshold > content.data.len() as u64 {
            return Err(BucketError::InvalidArgument(format!(
                "dirty threshold {} is past the end of local content ({} bytes)",
                content.dirty_threshold,
                content.data.len()
            )));
        }
        let kind = choose_creator(src, content.dirty_threshold, self.append_threshold)?;
        debug!(file = file_name, ?kind, size = content.data.len(), "Syncing object");

        let result = match (kind, src) {
            (CreatorKind::Append, Some(src)) => {
                let tail = content.data.slice(src.size as usize..);
                self.append_creator
                    .create(ctx, file_name, Some(src), content.mtime, contents_from(tail))
                    .await
            }
            _ => {
                self.full_creator
                    .create(
                        ctx,
                        file_name,
                        src,
                        content.mtime,
                        contents_from(content.data.clone()),
                    )
                    .await
            }
        };

        match result {
            Err(err) if err.is_precondition() => Err(err),
            other => other.annotate("Create"),
        }
    }
}

impl Bucket for SyncerBucket {
    fn name(&self) -> &str {
        self.bucket.name()
    }

    fn create_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: CreateObjectRequest,
    ) -> BucketFuture<'a, Object> {
        self.bucket.create_object(ctx, req)
    }

    fn read_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: ReadObjectRequest,
    ) -> BucketFuture<'a, ObjectContents> {
        self.bucket.read_object(ctx, req)
    }

    fn stat_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: StatObjectRequest,
    ) -> BucketFuture<'a, Object> {
        self.bucket.stat_object(ctx, req)
    }

    fn list_objects<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: ListObjectsRequest,
    ) -> BucketFuture<'a, Listing> {
        self.bucket.list_objects(ctx, req)
    }

    fn update_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: UpdateObjectRequest,
    ) -> BucketFuture<'a, Object> {
        self.bucket.update_object(ctx, req)
    }

    fn delete_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: DeleteObjectRequest,
    ) -> BucketFuture<'a, ()> {
        self.bucket.delete_object(ctx, req)
    }

    fn compose_objects<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: ComposeObjectsRequest,
    ) -> BucketFuture<'a, Object> {
        self.bucket.compose_objects(ctx, req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimulatedClock;
    use crate::storage::{ErrorKind, InMemoryBucket};
    use crate::sync::MTIME_METADATA_KEY;
    use std::collections::HashMap;

    const PREFIX: &str = ".gcsfuse_tmp/";

    fn setup(append_threshold: u64) -> (InMemoryBucket, SyncerBucket) {
        let bucket = InMemoryBucket::new("syncer", Arc::new(SimulatedClock::default()));
        let syncer = SyncerBucket::new(Arc::new(bucket.clone()), append_threshold, PREFIX);
        (bucket, syncer)
    }

    #[tokio::test]
    async fn test_sync_new_file() {
        let (bucket, syncer) = setup(4);
        let ctx = OpContext::background();

        let o = syncer
            .sync_object(&ctx, "new", None, &LocalContent::new("hello"))
            .await
            .unwrap();
        assert_eq!(o.component_count, 1);
        assert_eq!(bucket.contents("new").unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_sync_appends_when_prefix_unchanged() {
        let (bucket, syncer) = setup(4);
        let ctx = OpContext::background();
        let src = bucket.put("f", "taco", HashMap::new());
        let mtime = DateTime::<Utc>::default();

        let content = LocalContent::new("tacoburrito")
            .with_dirty_threshold(4)
            .with_mtime(mtime);
        let o = syncer
            .sync_object(&ctx, "f", Some(&src), &content)
            .await
            .unwrap();

        assert_eq!(o.component_count, 2);
        assert_eq!(bucket.contents("f").unwrap(), "tacoburrito");
        assert_eq!(
            o.metadata.get(MTIME_METADATA_KEY).map(String::as_str),
            Some("1970-01-01T00:00:00Z")
        );
        assert_eq!(bucket.object_names(), vec!["f".to_string()]);
    }

    #[tokio::test]
    async fn test_sync_rewrites_when_prefix_dirty() {
        let (bucket, syncer) = setup(4);
        let ctx = OpContext::background();
        let src = bucket.put("f", "taco", HashMap::new());

        let content = LocalContent::new("nachos").with_dirty_threshold(1);
        let o = syncer
            .sync_object(&ctx, "f", Some(&src), &content)
            .await
            .unwrap();

        assert_eq!(o.component_count, 1);
        assert_eq!(bucket.contents("f").unwrap(), "nachos");
    }

    #[tokio::test]
    async fn test_sync_clobber_is_unannotated_precondition() {
        let (bucket, syncer) = setup(0);
        let ctx = OpContext::background();
        let src = bucket.put("f", "taco", HashMap::new());
        bucket.put("f", "other", HashMap::new());

        let err = syncer
            .sync_object(
                &ctx,
                "f",
                Some(&src),
                &LocalContent::new("tacos").with_dirty_threshold(4),
            )
            .await
            .unwrap_err();
        assert!(err.is_precondition());
        assert!(!err.op_path().contains(&"Create"));
    }

    #[tokio::test]
    async fn test_sync_other_errors_annotated() {
        let clock = Arc::new(SimulatedClock::default());
        let missing = InMemoryBucket::missing("gone", clock);
        let syncer = SyncerBucket::new(Arc::new(missing), 0, PREFIX);
        let ctx = OpContext::background();

        let err = syncer
            .sync_object(&ctx, "f", None, &LocalContent::new("x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BucketNotExist);
        assert_eq!(err.op_path(), vec!["Create"]);
    }

    #[tokio::test]
    async fn test_sync_rejects_threshold_past_end() {
        let (bucket, syncer) = setup(0);
        let ctx = OpContext::background();
        let src = bucket.put("f", "taco", HashMap::new());

        let err = syncer
            .sync_object(
                &ctx,
                "f",
                Some(&src),
                &LocalContent::new("tacos").with_dirty_threshold(5),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}
