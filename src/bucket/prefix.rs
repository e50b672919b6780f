//! Directory-scoping decorator
//!
//! Exposes only the objects under a fixed prefix, with the prefix removed
//! from every name the caller sees and added to every name it sends.

use crate::context::OpContext;
use crate::storage::{
    Bucket, BucketFuture, ComposeObjectsRequest, CreateObjectRequest, DeleteObjectRequest,
    Listing, ListObjectsRequest, Object, ObjectContents, ReadObjectRequest, StatObjectRequest,
    UpdateObjectRequest,
};
use std::sync::Arc;

pub struct PrefixBucket {
    inner: Arc<dyn Bucket>,
    prefix: String,
}

impl PrefixBucket {
    pub fn new(inner: Arc<dyn Bucket>, prefix: impl Into<String>) -> Self {
        PrefixBucket {
            inner,
            prefix: prefix.into(),
        }
    }

    /// Prefix for a `only_dir` setting: surrounding slashes trimmed, one
    /// trailing slash added.
    pub fn for_only_dir(inner: Arc<dyn Bucket>, only_dir: &str) -> Self {
        Self::new(inner, format!("{}/", only_dir.trim_matches('/')))
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn wrap_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn unwrap_name(&self, name: String) -> String {
        match name.strip_prefix(&self.prefix) {
            Some(rest) => rest.to_string(),
            None => name,
        }
    }

    fn unwrap_object(&self, mut object: Object) -> Object {
        object.name = self.unwrap_name(object.name);
        object
    }
}

impl Bucket for PrefixBucket {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn create_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        mut req: CreateObjectRequest,
    ) -> BucketFuture<'a, Object> {
        req.name = self.wrap_name(&req.name);
        Box::pin(async move {
            let object = self.inner.create_object(ctx, req).await?;
            Ok(self.unwrap_object(object))
        })
    }

    fn read_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        mut req: ReadObjectRequest,
    ) -> BucketFuture<'a, ObjectContents> {
        req.name = self.wrap_name(&req.name);
        self.inner.read_object(ctx, req)
    }

    fn stat_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        mut req: StatObjectRequest,
    ) -> BucketFuture<'a, Object> {
        req.name = self.wrap_name(&req.name);
        Box::pin(async move {
            let object = self.inner.stat_object(ctx, req).await?;
            Ok(self.unwrap_object(object))
        })
    }

    fn list_objects<'a>(
        &'a self,
        ctx: &'a OpContext,
        mut req: ListObjectsRequest,
    ) -> BucketFuture<'a, Listing> {
        req.prefix = self.wrap_name(&req.prefix);
        Box::pin(async move {
            let listing = self.inner.list_objects(ctx, req).await?;
            Ok(Listing {
                objects: listing
                    .objects
                    .into_iter()
                    .map(|o| self.unwrap_object(o))
                    .collect(),
                collapsed_runs: listing
                    .collapsed_runs
                    .into_iter()
                    .map(|run| self.unwrap_name(run))
                    .collect(),
                continuation_token: listing.continuation_token,
            })
        })
    }

    fn update_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        mut req: UpdateObjectRequest,
    ) -> BucketFuture<'a, Object> {
        req.name = self.wrap_name(&req.name);
        Box::pin(async move {
            let object = self.inner.update_object(ctx, req).await?;
            Ok(self.unwrap_object(object))
        })
    }

    fn delete_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        mut req: DeleteObjectRequest,
    ) -> BucketFuture<'a, ()> {
        req.name = self.wrap_name(&req.name);
        self.inner.delete_object(ctx, req)
    }

    fn compose_objects<'a>(
        &'a self,
        ctx: &'a OpContext,
        mut req: ComposeObjectsRequest,
    ) -> BucketFuture<'a, Object> {
        req.dst_name = self.wrap_name(&req.dst_name);
        for source in &mut req.sources {
            source.name = self.wrap_name(&source.name);
        }
        Box::pin(async move {
            let object = self.inner.compose_objects(ctx, req).await?;
            Ok(self.unwrap_object(object))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimulatedClock;
    use crate::storage::{contents_from, ComposeSource, InMemoryBucket};
    use std::collections::HashMap;

    fn setup() -> (InMemoryBucket, PrefixBucket) {
        let store = InMemoryBucket::new("scoped", Arc::new(SimulatedClock::default()));
        let bucket = PrefixBucket::for_only_dir(Arc::new(store.clone()), "/logs/");
        (store, bucket)
    }

    #[test]
    fn test_only_dir_prefix() {
        let (_, bucket) = setup();
        assert_eq!(bucket.prefix(), "logs/");
    }

    #[tokio::test]
    async fn test_names_are_scoped() {
        let (store, bucket) = setup();
        let ctx = OpContext::background();

        let o = bucket
            .create_object(&ctx, CreateObjectRequest::new("a.txt", contents_from("x")))
            .await
            .unwrap();
        assert_eq!(o.name, "a.txt");
        assert_eq!(store.object_names(), vec!["logs/a.txt".to_string()]);

        let stat = bucket
            .stat_object(&ctx, StatObjectRequest::new("a.txt"))
            .await
            .unwrap();
        assert_eq!(stat.name, "a.txt");
    }

    #[tokio::test]
    async fn test_listing_hides_outside_objects() {
        let (store, bucket) = setup();
        let ctx = OpContext::background();
        store.put("logs/a", "x", HashMap::new());
        store.put("logs/sub/b", "x", HashMap::new());
        store.put("other/c", "x", HashMap::new());

        let listing = bucket
            .list_objects(
                &ctx,
                ListObjectsRequest {
                    delimiter: Some("/".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let names: Vec<_> = listing.objects.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["a"]);
        assert_eq!(listing.collapsed_runs, vec!["sub/".to_string()]);
    }

    #[tokio::test]
    async fn test_compose_sources_are_scoped() {
        let (store, bucket) = setup();
        let ctx = OpContext::background();
        let a = store.put("logs/a", "foo", HashMap::new());
        let b = store.put("logs/b", "bar", HashMap::new());

        let o = bucket
            .compose_objects(
                &ctx,
                ComposeObjectsRequest {
                    dst_name: "a".into(),
                    sources: vec![
                        ComposeSource::new("a", a.generation),
                        ComposeSource::new("b", b.generation),
                    ],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(o.name, "a");
        assert_eq!(store.contents("logs/a").unwrap(), "foobar");
    }
}
