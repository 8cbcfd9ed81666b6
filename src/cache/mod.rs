//! Cache layer: key/value store backends, the cache-aside accessor, the
//! invalidation router and the rate limiter.

pub mod accessor;
pub mod invalidation;
pub mod keys;
pub mod rate_limit;
pub mod redis;
pub mod store;

pub use accessor::CacheAside;
pub use invalidation::{FollowDelta, InvalidationError, InvalidationRouter};
pub use rate_limit::{RateLimitError, RateLimiter};
pub use store::{BatchOp, KeyValueStore, MemoryStore, StoreError};
