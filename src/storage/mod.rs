//! Object storage surface
//!
//! The versioned bucket abstraction, its object model and error taxonomy,
//! plus an in-memory implementation and a fault-injecting wrapper used by
//! tests and simulation.

mod bucket;
mod error;
mod fake;
mod object;
mod simulated;

pub use bucket::{list_prefix, Bucket, BucketFuture, StorageHandle};
pub use error::{Annotate, BucketError, BucketResult, ErrorKind};
pub use fake::{FakeStorage, InMemoryBucket};
pub use object::{
    contents_from, ByteRange, ComposeObjectsRequest, ComposeSource, CreateObjectRequest,
    DeleteObjectRequest, Listing, ListObjectsRequest, Object, ObjectAttrs, ObjectContents,
    ReadObjectRequest, StatObjectRequest, UpdateObjectRequest, MAX_COMPONENT_COUNT,
    MAX_COMPOSE_SOURCES,
};
pub use simulated::{SimulatedBucket, SimulatedBucketConfig, SimulatedBucketStats};
