//! Bucket decorators and the manager that stacks them
//!
//! Each decorator wraps an `Arc<dyn Bucket>` and adds one concern:
//!
//! - [`DebugBucket`]: request/response logging
//! - [`MonitoringBucket`]: per-method counters and latency
//! - [`PrefixBucket`]: scoping to a single directory
//! - [`BandwidthLimitedBucket`]: egress byte throttling
//! - [`RateLimitedBucket`]: operation throttling
//! - [`CachingBucket`]: stat cache with negative entries
//!
//! [`BucketManager`] applies them in that order, innermost first, according
//! to a [`BucketConfig`].

mod bandwidth;
mod config;
mod debug;
mod manager;
mod monitoring;
mod prefix;
mod rate_limited;
mod stat_cache;
mod throttle;

pub use bandwidth::{BandwidthLimitedBucket, ThrottledReader};
pub use config::{BucketConfig, ConfigError};
pub use debug::DebugBucket;
pub use manager::{BucketManager, SetUpBucketError};
pub use monitoring::{BucketMetrics, MethodSnapshot, MethodStats, MonitoringBucket};
pub use prefix::PrefixBucket;
pub use rate_limited::RateLimitedBucket;
pub use stat_cache::{CacheLookup, CachingBucket, StatCache};
pub use throttle::{choose_token_bucket_capacity, Throttle, ThrottleError, RATE_LIMIT_WINDOW};
