//! Result cache for idempotent downstream calls

mod fingerprint;
mod store;

pub use fingerprint::Fingerprint;
pub use store::{CacheConfig, CacheEntry, CacheStats, ResultCache};
