//! Object synchronization
//!
//! Committing local file mutations to immutable, versioned objects:
//!
//! - **Creators**: full upload or append-via-compose, chosen per sync
//! - **Staging names**: random, collision-resistant temp object names
//! - **SyncerBucket**: the decorated bucket plus `sync_object`
//! - **Garbage collection**: periodic removal of orphaned staging objects
//!
//! Every write carries the generation preconditions of the snapshot it was
//! based on, so concurrent writers are detected rather than silently lost.

mod append_creator;
mod creator;
mod full_creator;
mod gc;
mod syncer;
mod temp_name;

pub use append_creator::{merge_cleanup, AppendObjectCreator, CLEANUP_GRACE_PERIOD};
pub use creator::{
    choose_creator, format_mtime, merged_metadata, CreatorKind, ObjectCreator, MTIME_METADATA_KEY,
};
pub use full_creator::FullObjectCreator;
pub use gc::{
    garbage_collect_once, GarbageCollector, SweepError, SweepReport, DEFAULT_GC_GRACE_PERIOD,
    DEFAULT_GC_INTERVAL,
};
pub use syncer::{LocalContent, SyncerBucket};
pub use temp_name::TempNameGenerator;
