//! Stat cache
//!
//! Bounded LRU of recent object snapshots, each with an expiry taken from
//! the injected clock. A `None` entry records that an object is known not to
//! exist, so repeated lookups of missing names stay local too.

use crate::clock::Clock;
use crate::context::OpContext;
use crate::storage::{
    Bucket, BucketError, BucketFuture, ComposeObjectsRequest, CreateObjectRequest,
    DeleteObjectRequest, Listing, ListObjectsRequest, Object, ObjectContents, ReadObjectRequest,
    StatObjectRequest, UpdateObjectRequest,
};
use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

#[derive(Debug, Clone)]
struct CacheEntry {
    object: Option<Object>,
    expiry: DateTime<Utc>,
}

/// Result of a cache lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// The object exists, as of this snapshot
    Hit(Object),
    /// The object is known not to exist
    NegativeHit,
    Miss,
}

pub struct StatCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl StatCache {
    /// A cache of at most `capacity` entries (at least one), each valid for `ttl`
    pub fn new(capacity: usize, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
        StatCache {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            clock,
        }
    }

    fn expiry(&self) -> DateTime<Utc> {
        self.clock
            .now()
            .checked_add_signed(self.ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Record a snapshot, unless a newer one for the same name is cached.
    pub fn insert(&self, object: &Object) {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        if let Some(CacheEntry {
            object: Some(existing),
            expiry,
        }) = entries.peek(&object.name)
        {
            let newer = (existing.generation, existing.meta_generation)
                > (object.generation, object.meta_generation);
            if newer && *expiry > now {
                return;
            }
        }
        entries.put(
            object.name.clone(),
            CacheEntry {
                object: Some(object.clone()),
                expiry: self.expiry(),
            },
        );
    }

    /// Record that `name` does not exist.
    pub fn add_negative_entry(&self, name: &str) {
        let expiry = self.expiry();
        self.entries.lock().put(
            name.to_string(),
            CacheEntry {
                object: None,
                expiry,
            },
        );
    }

    pub fn erase(&self, name: &str) {
        self.entries.lock().pop(name);
    }

    pub fn look_up(&self, name: &str) -> CacheLookup {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let expired = match entries.get(name) {
            None => return CacheLookup::Miss,
            Some(entry) if entry.expiry <= now => true,
            Some(CacheEntry {
                object: Some(object),
                ..
            }) => return CacheLookup::Hit(object.clone()),
            Some(CacheEntry { object: None, .. }) => return CacheLookup::NegativeHit,
        };
        if expired {
            entries.pop(name);
        }
        CacheLookup::Miss
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Serves stats from a [`StatCache`] and keeps it coherent with writes.
pub struct CachingBucket {
    inner: Arc<dyn Bucket>,
    cache: Arc<StatCache>,
}

impl CachingBucket {
    pub fn new(inner: Arc<dyn Bucket>, cache: Arc<StatCache>) -> Self {
        CachingBucket { inner, cache }
    }

    pub fn cache(&self) -> &Arc<StatCache> {
        &self.cache
    }
}

impl Bucket for CachingBucket {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn create_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: CreateObjectRequest,
    ) -> BucketFuture<'a, Object> {
        Box::pin(async move {
            self.cache.erase(&req.name);
            let object = self.inner.create_object(ctx, req).await?;
            self.cache.insert(&object);
            Ok(object)
        })
    }

    fn read_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: ReadObjectRequest,
    ) -> BucketFuture<'a, ObjectContents> {
        self.inner.read_object(ctx, req)
    }

    fn stat_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: StatObjectRequest,
    ) -> BucketFuture<'a, Object> {
        Box::pin(async move {
            match self.cache.look_up(&req.name) {
                CacheLookup::Hit(object) => {
                    trace!(object = %req.name, "Stat cache hit");
                    return Ok(object);
                }
                CacheLookup::NegativeHit => {
                    trace!(object = %req.name, "Stat cache negative hit");
                    return Err(BucketError::NotFound(format!("object {:?}", req.name)));
                }
                CacheLookup::Miss => {}
            }

            let name = req.name.clone();
            match self.inner.stat_object(ctx, req).await {
                Ok(object) => {
                    self.cache.insert(&object);
                    Ok(object)
                }
                Err(err) => {
                    if err.is_not_found() {
                        self.cache.add_negative_entry(&name);
                    }
                    Err(err)
                }
            }
        })
    }

    fn list_objects<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: ListObjectsRequest,
    ) -> BucketFuture<'a, Listing> {
        Box::pin(async move {
            let listing = self.inner.list_objects(ctx, req).await?;
            for object in &listing.objects {
                self.cache.insert(object);
            }
            Ok(listing)
        })
    }

    fn update_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: UpdateObjectRequest,
    ) -> BucketFuture<'a, Object> {
        Box::pin(async move {
            self.cache.erase(&req.name);
            let object = self.inner.update_object(ctx, req).await?;
            self.cache.insert(&object);
            Ok(object)
        })
    }

    fn delete_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: DeleteObjectRequest,
    ) -> BucketFuture<'a, ()> {
        Box::pin(async move {
            let name = req.name.clone();
            self.cache.erase(&name);
            self.inner.delete_object(ctx, req).await?;
            self.cache.add_negative_entry(&name);
            Ok(())
        })
    }

    fn compose_objects<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: ComposeObjectsRequest,
    ) -> BucketFuture<'a, Object> {
        Box::pin(async move {
            self.cache.erase(&req.dst_name);
            let object = self.inner.compose_objects(ctx, req).await?;
            self.cache.insert(&object);
            Ok(object)
        })
    }
}
