//! Remote object model and request types
//!
//! An [`Object`] is a point-in-time snapshot of a versioned remote object.
//! Snapshots are plain values: nothing in this crate mutates one after the
//! store hands it out, and every write returns a fresh snapshot.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use tokio::io::AsyncRead;

/// Upper bound on the number of components a composite object may have
pub const MAX_COMPONENT_COUNT: u32 = 1024;

/// Upper bound on the number of sources in one compose request
pub const MAX_COMPOSE_SOURCES: usize = 32;

/// Streamed object content, either uploaded by a create or returned by a read
pub type ObjectContents = Box<dyn AsyncRead + Send + Unpin>;

/// Wrap in-memory bytes as streamed content.
pub fn contents_from(data: impl Into<Bytes>) -> ObjectContents {
    Box::new(std::io::Cursor::new(data.into()))
}

/// Descriptive attributes carried unchanged across generations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectAttrs {
    pub cache_control: Option<String>,
    pub content_disposition: Option<String>,
    pub content_encoding: Option<String>,
    pub content_language: Option<String>,
    pub content_type: Option<String>,
    /// RFC 3339 text, as the store reports it
    pub custom_time: Option<String>,
    pub event_based_hold: bool,
    pub storage_class: Option<String>,
}

/// Snapshot of a remote object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    pub name: String,
    /// Content version, assigned by the store
    pub generation: i64,
    /// Metadata version, assigned by the store
    pub meta_generation: i64,
    pub size: u64,
    pub md5: Option<[u8; 16]>,
    pub component_count: u32,
    pub updated: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
    pub attrs: ObjectAttrs,
}

/// Create (or overwrite) an object
pub struct CreateObjectRequest {
    pub name: String,
    pub contents: ObjectContents,
    pub metadata: HashMap<String, String>,
    pub attrs: ObjectAttrs,
    /// `Some(0)` means the object must not exist yet
    pub generation_precondition: Option<i64>,
    pub meta_generation_precondition: Option<i64>,
}

impl CreateObjectRequest {
    pub fn new(name: impl Into<String>, contents: ObjectContents) -> Self {
        CreateObjectRequest {
            name: name.into(),
            contents,
            metadata: HashMap::new(),
            attrs: ObjectAttrs::default(),
            generation_precondition: None,
            meta_generation_precondition: None,
        }
    }
}

impl fmt::Debug for CreateObjectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateObjectRequest")
            .field("name", &self.name)
            .field("metadata", &self.metadata)
            .field("attrs", &self.attrs)
            .field("generation_precondition", &self.generation_precondition)
            .field("meta_generation_precondition", &self.meta_generation_precondition)
            .finish_non_exhaustive()
    }
}

/// Byte range `[start, limit)` of an object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ReadObjectRequest {
    pub name: String,
    /// Zero reads the latest generation
    pub generation: i64,
    pub range: Option<ByteRange>,
}

impl ReadObjectRequest {
    pub fn latest(name: impl Into<String>) -> Self {
        ReadObjectRequest {
            name: name.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StatObjectRequest {
    pub name: String,
}

impl StatObjectRequest {
    pub fn new(name: impl Into<String>) -> Self {
        StatObjectRequest { name: name.into() }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListObjectsRequest {
    pub prefix: String,
    /// When set, names containing the delimiter past the prefix collapse into runs
    pub delimiter: Option<String>,
    pub continuation_token: Option<String>,
    /// Zero means the store default
    pub max_results: usize,
}

/// One page of a listing
#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub objects: Vec<Object>,
    pub collapsed_runs: Vec<String>,
    /// Present when more results exist
    pub continuation_token: Option<String>,
}

/// Patch an object's metadata; bumps only the meta-generation
#[derive(Debug, Clone, Default)]
pub struct UpdateObjectRequest {
    pub name: String,
    /// Zero targets the latest generation
    pub generation: i64,
    pub meta_generation_precondition: Option<i64>,
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    pub content_disposition: Option<String>,
    pub content_encoding: Option<String>,
    pub content_language: Option<String>,
    pub custom_time: Option<String>,
    pub event_based_hold: Option<bool>,
    /// `None` values remove the key
    pub metadata: HashMap<String, Option<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteObjectRequest {
    pub name: String,
    /// Zero deletes the latest generation
    pub generation: i64,
    pub meta_generation_precondition: Option<i64>,
}

impl DeleteObjectRequest {
    pub fn latest(name: impl Into<String>) -> Self {
        DeleteObjectRequest {
            name: name.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeSource {
    pub name: String,
    /// Zero means the latest generation
    pub generation: i64,
}

impl ComposeSource {
    pub fn new(name: impl Into<String>, generation: i64) -> Self {
        ComposeSource {
            name: name.into(),
            generation,
        }
    }
}

/// Concatenate `sources`, in order, into `dst_name`
#[derive(Debug, Clone, Default)]
pub struct ComposeObjectsRequest {
    pub dst_name: String,
    pub dst_generation_precondition: Option<i64>,
    pub dst_meta_generation_precondition: Option<i64>,
    pub sources: Vec<ComposeSource>,
    pub metadata: HashMap<String, String>,
    pub attrs: ObjectAttrs,
}
