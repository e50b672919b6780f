//! In-memory bucket
//!
//! A versioned, precondition-checking bucket held entirely in memory, for
//! unit tests, simulation, and the demo binary. It keeps only the latest
//! generation of each object, so naming an older generation (as a compose
//! source, read, or delete target) fails with `NotFound`, exactly as it does
//! on the real store once the object has been overwritten.
//!
//! Generations come from one bucket-wide counter; meta-generations count up
//! per name across overwrites.

use crate::clock::Clock;
use crate::context::OpContext;
use crate::storage::{
    Bucket, BucketError, BucketFuture, BucketResult, ComposeObjectsRequest, CreateObjectRequest,
    DeleteObjectRequest, Listing, ListObjectsRequest, Object, ObjectAttrs, ObjectContents,
    ReadObjectRequest, StatObjectRequest, StorageHandle, UpdateObjectRequest,
    MAX_COMPONENT_COUNT, MAX_COMPOSE_SOURCES,
};
use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

const DEFAULT_MAX_RESULTS: usize = 1000;

#[derive(Debug, Clone)]
struct StoredObject {
    object: Object,
    data: Bytes,
}

#[derive(Debug, Default)]
struct BucketState {
    objects: BTreeMap<String, StoredObject>,
    last_generation: i64,
}

impl BucketState {
    fn next_generation(&mut self) -> i64 {
        self.last_generation += 1;
        self.last_generation
    }
}

/// In-memory bucket; clones share state
#[derive(Clone)]
pub struct InMemoryBucket {
    name: Arc<str>,
    exists: bool,
    clock: Arc<dyn Clock>,
    state: Arc<RwLock<BucketState>>,
}

impl std::fmt::Debug for InMemoryBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBucket")
            .field("name", &self.name)
            .field("exists", &self.exists)
            .field("objects", &self.state.read().objects.len())
            .finish()
    }
}

impl InMemoryBucket {
    pub fn new(name: &str, clock: Arc<dyn Clock>) -> Self {
        InMemoryBucket {
            name: Arc::from(name),
            exists: true,
            clock,
            state: Arc::new(RwLock::new(BucketState::default())),
        }
    }

    /// Handle to a bucket that does not exist; every operation fails
    pub fn missing(name: &str, clock: Arc<dyn Clock>) -> Self {
        InMemoryBucket {
            exists: false,
            ..Self::new(name, clock)
        }
    }

    /// Number of stored objects (for testing)
    pub fn len(&self) -> usize {
        self.state.read().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().objects.is_empty()
    }

    /// Sorted names of every stored object (for testing)
    pub fn object_names(&self) -> Vec<String> {
        self.state.read().objects.keys().cloned().collect()
    }

    /// Latest contents of an object (for testing)
    pub fn contents(&self, name: &str) -> Option<Bytes> {
        self.state.read().objects.get(name).map(|s| s.data.clone())
    }

    /// Latest snapshot of an object (for testing)
    pub fn snapshot(&self, name: &str) -> Option<Object> {
        self.state.read().objects.get(name).map(|s| s.object.clone())
    }

    /// Unconditionally write an object, bypassing preconditions (test fixtures)
    pub fn put(&self, name: &str, data: impl Into<Bytes>, metadata: HashMap<String, String>) -> Object {
        let data = data.into();
        let mut state = self.state.write();
        let prev_meta = state.objects.get(name).map(|s| s.object.meta_generation);
        let object = self.new_object(
            &mut state,
            name,
            &data,
            1,
            prev_meta,
            metadata,
            ObjectAttrs::default(),
        );
        state.objects.insert(
            name.to_string(),
            StoredObject {
                object: object.clone(),
                data,
            },
        );
        object
    }

    fn check(&self, ctx: &OpContext) -> BucketResult<()> {
        ctx.check()?;
        if !self.exists {
            return Err(BucketError::BucketNotExist);
        }
        Ok(())
    }

    fn new_object(
        &self,
        state: &mut BucketState,
        name: &str,
        data: &Bytes,
        component_count: u32,
        prev_meta_generation: Option<i64>,
        metadata: HashMap<String, String>,
        attrs: ObjectAttrs,
    ) -> Object {
        Object {
            name: name.to_string(),
            generation: state.next_generation(),
            meta_generation: prev_meta_generation.map_or(1, |m| m + 1),
            size: data.len() as u64,
            md5: Some(md5::compute(data).0),
            component_count,
            updated: self.clock.now(),
            metadata,
            attrs,
        }
    }

    async fn create(&self, ctx: &OpContext, mut req: CreateObjectRequest) -> BucketResult<Object> {
        self.check(ctx)?;

        let mut buf = Vec::new();
        req.contents.read_to_end(&mut buf).await?;
        let data = Bytes::from(buf);

        let mut state = self.state.write();
        let existing = state.objects.get(&req.name).map(|s| &s.object);
        check_preconditions(
            &req.name,
            existing,
            req.generation_precondition,
            req.meta_generation_precondition,
        )?;
        let prev_meta = existing.map(|o| o.meta_generation);

        let object = self.new_object(
            &mut state,
            &req.name,
            &data,
            1,
            prev_meta,
            req.metadata,
            req.attrs,
        );
        state.objects.insert(
            req.name,
            StoredObject {
                object: object.clone(),
                data,
            },
        );
        Ok(object)
    }

    fn read(&self, ctx: &OpContext, req: ReadObjectRequest) -> BucketResult<ObjectContents> {
        self.check(ctx)?;
        let state = self.state.read();
        let stored = lookup(&state, &req.name, req.generation)?;
        let len = stored.data.len() as u64;
        let data = match req.range {
            Some(range) => {
                let start = range.start.min(len) as usize;
                let limit = range.limit.clamp(range.start.min(len), len) as usize;
                stored.data.slice(start..limit)
            }
            None => stored.data.clone(),
        };
        Ok(Box::new(std::io::Cursor::new(data)))
    }

    fn stat(&self, ctx: &OpContext, req: StatObjectRequest) -> BucketResult<Object> {
        self.check(ctx)?;
        let state = self.state.read();
        Ok(lookup(&state, &req.name, 0)?.object.clone())
    }

    fn list(&self, ctx: &OpContext, req: ListObjectsRequest) -> BucketResult<Listing> {
        self.check(ctx)?;
        let max_results = if req.max_results == 0 {
            DEFAULT_MAX_RESULTS
        } else {
            req.max_results
        };
        let start = match &req.continuation_token {
            Some(token) => Bound::Excluded(token.clone()),
            None => Bound::Included(req.prefix.clone()),
        };

        let state = self.state.read();
        let mut listing = Listing::default();
        let mut last_consumed: Option<&String> = None;
        let mut truncated = false;

        for (name, stored) in state.objects.range((start, Bound::Unbounded)) {
            if !name.starts_with(&req.prefix) {
                if name.as_str() > req.prefix.as_str() {
                    break;
                }
                continue;
            }
            let run = req.delimiter.as_deref().and_then(|delim| {
                let rest = &name[req.prefix.len()..];
                rest.find(delim)
                    .map(|idx| name[..req.prefix.len() + idx + delim.len()].to_string())
            });
            let starts_new_entry = match &run {
                Some(run) => listing.collapsed_runs.last() != Some(run),
                None => true,
            };
            if starts_new_entry && listing.objects.len() + listing.collapsed_runs.len() >= max_results {
                truncated = true;
                break;
            }
            match run {
                Some(run) if starts_new_entry => listing.collapsed_runs.push(run),
                Some(_) => {}
                None => listing.objects.push(stored.object.clone()),
            }
            last_consumed = Some(name);
        }

        if truncated {
            listing.continuation_token = last_consumed.cloned();
        }
        Ok(listing)
    }

    fn update(&self, ctx: &OpContext, req: UpdateObjectRequest) -> BucketResult<Object> {
        self.check(ctx)?;
        let now = self.clock.now();
        let mut state = self.state.write();
        let existing = lookup(&state, &req.name, req.generation)?.object.clone();
        check_preconditions(&req.name, Some(&existing), None, req.meta_generation_precondition)?;

        let Some(stored) = state.objects.get_mut(&req.name) else {
            return Err(BucketError::NotFound(format!("object {:?}", req.name)));
        };
        let object = &mut stored.object;
        let attrs = &mut object.attrs;
        for (field, value) in [
            (&mut attrs.content_type, req.content_type),
            (&mut attrs.cache_control, req.cache_control),
            (&mut attrs.content_disposition, req.content_disposition),
            (&mut attrs.content_encoding, req.content_encoding),
            (&mut attrs.content_language, req.content_language),
            (&mut attrs.custom_time, req.custom_time),
        ] {
            if value.is_some() {
                *field = value;
            }
        }
        if let Some(hold) = req.event_based_hold {
            attrs.event_based_hold = hold;
        }
        for (key, value) in req.metadata {
            match value {
                Some(value) => {
                    object.metadata.insert(key, value);
                }
                None => {
                    object.metadata.remove(&key);
                }
            }
        }
        object.meta_generation += 1;
        object.updated = now;
        Ok(object.clone())
    }

    fn delete(&self, ctx: &OpContext, req: DeleteObjectRequest) -> BucketResult<()> {
        self.check(ctx)?;
        let mut state = self.state.write();
        let existing = lookup(&state, &req.name, req.generation)?;
        check_preconditions(
            &req.name,
            Some(&existing.object),
            None,
            req.meta_generation_precondition,
        )?;
        state.objects.remove(&req.name);
        Ok(())
    }

    fn compose(&self, ctx: &OpContext, req: ComposeObjectsRequest) -> BucketResult<Object> {
        self.check(ctx)?;
        if req.sources.is_empty() || req.sources.len() > MAX_COMPOSE_SOURCES {
            return Err(BucketError::InvalidArgument(format!(
                "compose needs between 1 and {} sources, got {}",
                MAX_COMPOSE_SOURCES,
                req.sources.len()
            )));
        }

        let mut state = self.state.write();

        // Sources first: a clobbered destination shows up as a missing source.
        let mut data = BytesMut::new();
        let mut component_count = 0u32;
        for source in &req.sources {
            let stored = lookup(&state, &source.name, source.generation)?;
            data.extend_from_slice(&stored.data);
            component_count = component_count.saturating_add(stored.object.component_count);
        }
        if component_count > MAX_COMPONENT_COUNT {
            return Err(BucketError::InvalidArgument(format!(
                "composite object would have {} components (max {})",
                component_count, MAX_COMPONENT_COUNT
            )));
        }

        let existing = state.objects.get(&req.dst_name).map(|s| &s.object);
        check_preconditions(
            &req.dst_name,
            existing,
            req.dst_generation_precondition,
            req.dst_meta_generation_precondition,
        )?;
        let prev_meta = existing.map(|o| o.meta_generation);

        let data = data.freeze();
        let object = self.new_object(
            &mut state,
            &req.dst_name,
            &data,
            component_count,
            prev_meta,
            req.metadata,
            req.attrs,
        );
        state.objects.insert(
            req.dst_name,
            StoredObject {
                object: object.clone(),
                data,
            },
        );
        Ok(object)
    }
}

fn lookup<'s>(state: &'s BucketState, name: &str, generation: i64) -> BucketResult<&'s StoredObject> {
    match state.objects.get(name) {
        Some(stored) if generation == 0 || stored.object.generation == generation => Ok(stored),
        Some(_) => Err(BucketError::NotFound(format!(
            "object {:?} generation {}",
            name, generation
        ))),
        None => Err(BucketError::NotFound(format!("object {:?}", name))),
    }
}

fn check_preconditions(
    name: &str,
    existing: Option<&Object>,
    generation: Option<i64>,
    meta_generation: Option<i64>,
) -> BucketResult<()> {
    if let Some(expected) = generation {
        let actual = existing.map_or(0, |o| o.generation);
        if actual != expected {
            return Err(BucketError::Precondition(format!(
                "object {:?} has generation {}, expected {}",
                name, actual, expected
            )));
        }
    }
    if let Some(expected) = meta_generation {
        match existing {
            Some(o) if o.meta_generation == expected => {}
            Some(o) => {
                return Err(BucketError::Precondition(format!(
                    "object {:?} has meta-generation {}, expected {}",
                    name, o.meta_generation, expected
                )))
            }
            None => {
                return Err(BucketError::Precondition(format!(
                    "object {:?} does not exist, expected meta-generation {}",
                    name, expected
                )))
            }
        }
    }
    Ok(())
}

impl Bucket for InMemoryBucket {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: CreateObjectRequest,
    ) -> BucketFuture<'a, Object> {
        Box::pin(self.create(ctx, req))
    }

    fn read_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: ReadObjectRequest,
    ) -> BucketFuture<'a, ObjectContents> {
        Box::pin(async move { self.read(ctx, req) })
    }

    fn stat_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: StatObjectRequest,
    ) -> BucketFuture<'a, Object> {
        Box::pin(async move { self.stat(ctx, req) })
    }

    fn list_objects<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: ListObjectsRequest,
    ) -> BucketFuture<'a, Listing> {
        Box::pin(async move { self.list(ctx, req) })
    }

    fn update_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: UpdateObjectRequest,
    ) -> BucketFuture<'a, Object> {
        Box::pin(async move { self.update(ctx, req) })
    }

    fn delete_object<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: DeleteObjectRequest,
    ) -> BucketFuture<'a, ()> {
        Box::pin(async move { self.delete(ctx, req) })
    }

    fn compose_objects<'a>(
        &'a self,
        ctx: &'a OpContext,
        req: ComposeObjectsRequest,
    ) -> BucketFuture<'a, Object> {
        Box::pin(async move { self.compose(ctx, req) })
    }
}

/// In-memory store holding any number of named buckets
#[derive(Clone)]
pub struct FakeStorage {
    clock: Arc<dyn Clock>,
    buckets: Arc<RwLock<HashMap<String, InMemoryBucket>>>,
}

impl FakeStorage {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        FakeStorage {
            clock,
            buckets: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create (or return the existing) bucket with this name
    pub fn create_bucket(&self, name: &str) -> InMemoryBucket {
        self.buckets
            .write()
            .entry(name.to_string())
            .or_insert_with(|| InMemoryBucket::new(name, self.clock.clone()))
            .clone()
    }

    pub fn bucket(&self, name: &str) -> Option<InMemoryBucket> {
        self.buckets.read().get(name).cloned()
    }
}

impl StorageHandle for FakeStorage {
    fn bucket_handle(&self, bucket_name: &str, _billing_project: &str) -> Arc<dyn Bucket> {
        match self.bucket(bucket_name) {
            Some(bucket) => Arc::new(bucket),
            None => Arc::new(InMemoryBucket::missing(bucket_name, self.clock.clone())),
        }
    }
}
