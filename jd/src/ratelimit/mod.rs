//! Per-endpoint rate limiting for downstream calls

mod bucket;
mod limiter;

pub use bucket::{BucketConfig, TokenBucket};
pub use limiter::{RateLimitConfig, RateLimitError, RateLimiter};
