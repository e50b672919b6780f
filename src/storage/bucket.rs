//! Bucket capability
//!
//! The raw object-store surface the synchronization layer consumes. Every
//! decorator in [`crate::bucket`] implements the same trait and delegates to
//! an inner `Arc<dyn Bucket>`.

use crate::context::OpContext;
use crate::storage::{
    BucketResult, ComposeObjectsRequest, CreateObjectRequest, DeleteObjectRequest, Listing,
    ListObjectsRequest, Object, ObjectContents, ReadObjectRequest, StatObjectRequest,
    UpdateObjectRequest,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by bucket operations
pub type BucketFuture<'a, T> = Pin<Box<dyn Future<Output = BucketResult<T>> + Send + 'a>>;

/// Versioned object store bucket
pub trait Bucket: Send + Sync + 'static {
    /// Bucket name
    fn name(&self) -> &str;

    /// Create an object, subject to the request's preconditions
    fn create_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: CreateObjectRequest,
    ) -> BucketFuture<'a, Object>;

    /// Stream an object's contents
    fn read_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: ReadObjectRequest,
    ) -> BucketFuture<'a, ObjectContents>;

    /// Get an object's metadata without its contents
    fn stat_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: StatObjectRequest,
    ) -> BucketFuture<'a, Object>;

    /// List one page of objects
    fn list_objects<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: ListObjectsRequest,
    ) -> BucketFuture<'a, Listing>;

    /// Patch an object's metadata
    fn update_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: UpdateObjectRequest,
    ) -> BucketFuture<'a, Object>;

    /// Delete an object
    fn delete_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: DeleteObjectRequest,
    ) -> BucketFuture<'a, ()>;

    /// Compose sources into a destination, subject to destination preconditions
    fn compose_objects<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: ComposeObjectsRequest,
    ) -> BucketFuture<'a, Object>;
}

/// Connection to the store, handing out raw bucket handles
///
/// Obtaining a handle does not check that the bucket exists; the first
/// operation on a missing bucket fails with `BucketError::BucketNotExist`.
pub trait StorageHandle: Send + Sync {
    fn bucket_handle(&self, bucket_name: &str, billing_project: &str) -> Arc<dyn Bucket>;
}

/// List every object under `prefix`, following continuation tokens.
pub async fn list_prefix(
    ctx: &OpContext,
    bucket: &dyn Bucket,
    prefix: &str,
) -> BucketResult<Vec<Object>> {
    let mut objects = Vec::new();
    let mut continuation_token = None;
    loop {
        let listing = bucket
            .list_objects(
                ctx,
                ListObjectsRequest {
                    prefix: prefix.to_string(),
                    continuation_token: continuation_token.take(),
                    ..Default::default()
                },
            )
            .await?;
        objects.extend(listing.objects);
        match listing.continuation_token {
            Some(token) => continuation_token = Some(token),
            None => return Ok(objects),
        }
    }
}
