//! Object creation strategies
//!
//! Committing a dirty file means producing a new generation of its object.
//! [`FullObjectCreator`](super::FullObjectCreator) uploads the whole content;
//! [`AppendObjectCreator`](super::AppendObjectCreator) uploads only the new
//! tail and composes it onto the existing object. Which one runs is decided by
//! [`choose_creator`], never by the creators.

use crate::context::OpContext;
use crate::storage::{BucketError, BucketFuture, BucketResult, Object, ObjectContents};
use crate::storage::MAX_COMPONENT_COUNT;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::HashMap;

/// Metadata key under which a file's modification time is recorded
pub const MTIME_METADATA_KEY: &str = "gcsfuse_mtime";

/// Produces a new generation of an object from uploaded contents.
///
/// `src`, when present, is the snapshot the caller last saw; its generation
/// and meta-generation become the write preconditions, so a concurrent writer
/// surfaces as a precondition error rather than a lost update.
pub trait ObjectCreator: Send + Sync {
    fn create<'a>(
        &'a self,
        ctx: &'a OpContext,
        object_name: &'a str,
        src: Option<&'a Object>,
        mtime: Option<DateTime<Utc>>,
        contents: ObjectContents,
    ) -> BucketFuture<'a, Object>;
}

/// Render an mtime as UTC RFC 3339 with the shortest exact fraction.
pub fn format_mtime(mtime: DateTime<Utc>) -> String {
    let full = mtime.to_rfc3339_opts(SecondsFormat::Nanos, true);
    let Some(dot) = full.rfind('.') else {
        return full;
    };
    let fraction = full[dot + 1..full.len() - 1].trim_end_matches('0');
    if fraction.is_empty() {
        format!("{}Z", &full[..dot])
    } else {
        format!("{}.{}Z", &full[..dot], fraction)
    }
}

/// The source's metadata with the mtime key set (or left alone when `None`).
pub fn merged_metadata(
    src: Option<&Object>,
    mtime: Option<DateTime<Utc>>,
) -> HashMap<String, String> {
    let mut metadata = src.map(|o| o.metadata.clone()).unwrap_or_default();
    if let Some(mtime) = mtime {
        metadata.insert(MTIME_METADATA_KEY.to_string(), format_mtime(mtime));
    }
    metadata
}

/// Which creator commits a given sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreatorKind {
    Full,
    Append,
}

/// Pick the creation strategy for a sync.
///
/// Appending is only possible when the remote object is still a prefix of
/// the local content (nothing below `dirty_threshold` changed), the object is
/// large enough for the saved upload to matter, and another compose would
/// not exceed the component limit.
pub fn choose_creator(
    src: Option<&Object>,
    dirty_threshold: u64,
    append_threshold: u64,
) -> BucketResult<CreatorKind> {
    let Some(src) = src else {
        return Ok(CreatorKind::Full);
    };
    if dirty_threshold > src.size {
        return Err(BucketError::InvalidArgument(format!(
            "dirty threshold {} is past the end of {:?} ({} bytes)",
            dirty_threshold, src.name, src.size
        )));
    }
    if src.size >= append_threshold
        && dirty_threshold == src.size
        && src.component_count < MAX_COMPONENT_COUNT
    {
        Ok(CreatorKind::Append)
    } else {
        Ok(CreatorKind::Full)
    }
}
