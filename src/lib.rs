//! objsync
//!
//! Synchronizes locally mutated file contents back to a versioned object
//! store. Objects are immutable, so every sync writes a new generation:
//! either a full re-upload, or, when only bytes were appended, a small
//! staging object composed onto the end of the existing one. Generation
//! preconditions turn concurrent modification into a typed error instead of
//! a lost update.
//!
//! ```text
//! BucketManager::set_up_bucket
//!   SyncerBucket            sync_object, staging-object GC
//!     CachingBucket         stat cache
//!       RateLimitedBucket   ops/s
//!         BandwidthLimited  bytes/s
//!           PrefixBucket    only_dir
//!             Monitoring    metrics
//!               Debug       request log
//!                 raw bucket
//! ```

pub mod bucket;
pub mod clock;
pub mod context;
pub mod rng;
pub mod storage;
pub mod sync;

pub use bucket::{BucketConfig, BucketManager, SetUpBucketError};
pub use clock::{Clock, RealClock, SimulatedClock};
pub use context::OpContext;
pub use storage::{Bucket, BucketError, BucketResult, ErrorKind, FakeStorage, Object, StorageHandle};
pub use sync::{LocalContent, SyncerBucket};
