//! Full-upload object creator

use crate::context::OpContext;
use crate::storage::{Bucket, BucketFuture, CreateObjectRequest, Object, ObjectAttrs, ObjectContents};
use crate::sync::creator::{merged_metadata, ObjectCreator};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Uploads the complete content as a new generation of `object_name`.
///
/// With no source snapshot the object must not exist yet.
#[derive(Clone)]
pub struct FullObjectCreator {
    bucket: Arc<dyn Bucket>,
}

impl FullObjectCreator {
    pub fn new(bucket: Arc<dyn Bucket>) -> Self {
        FullObjectCreator { bucket }
    }
}

impl ObjectCreator for FullObjectCreator {
    fn create<'a>(
        &'a self,
        ctx: &'a OpContext,
        object_name: &'a str,
        src: Option<&'a Object>,
        mtime: Option<DateTime<Utc>>,
        contents: ObjectContents,
    ) -> BucketFuture<'a, Object> {
        Box::pin(async move {
            let mut req = CreateObjectRequest::new(object_name, contents);
            req.metadata = merged_metadata(src, mtime);
            match src {
                Some(src) => {
                    req.generation_precondition = Some(src.generation);
                    req.meta_generation_precondition = Some(src.meta_generation);
                    req.attrs = src.attrs.clone();
                }
                None => {
                    req.generation_precondition = Some(0);
                    req.attrs = ObjectAttrs::default();
                }
            }
            self.bucket.create_object(ctx, req).await
        })
    }
}
