//! Rate Limit Module
//!
//! Frontend admission control, applied per (bucket, verb) at the cluster edge.
//!
//! - **`token_bucket`**: lock-light token bucket; each admission consumes one token.
//! - **`limiter`**: the table of buckets keyed by a hash of bucket identity and verb,
//!   created lazily on first use and swept when idle.
//!
//! Buckets with rate limiting disabled never touch the table.

pub mod limiter;
pub mod token_bucket;

pub use limiter::{FrontendLimiter, Verb};
pub use token_bucket::TokenBucket;
