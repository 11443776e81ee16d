//! Gate Limits - abuse protection for the request gate
//!
//! - [`RateLimiter`]: token bucket per (route class, client network, tenant)
//! - [`BruteForceGuard`]: sliding-window failure counting with lockout
//! - [`LimitStore`]: atomic per-key state, in-process or shared via Redis
//!
//! The in-process store is only authoritative for a single gate instance.
//! Horizontally scaled deployments enable the `redis` feature and share a
//! [`RedisLimitStore`].

#![warn(clippy::all)]

pub mod bruteforce;
pub mod bucket;
pub mod failure;
pub mod ratelimit;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod store;
pub mod sweep;

pub use bruteforce::{AttemptStatus, AuthFlow, BruteForceConfig, BruteForceGuard, FailureOutcome};
pub use bucket::{BucketParams, TakeOutcome, TokenBucketState};
pub use failure::{BruteForcePolicy, FailureRecord, RecordState};
pub use ratelimit::{Quota, RateKey, RateLimitRule, RateLimiter};
#[cfg(feature = "redis")]
pub use redis_store::RedisLimitStore;
pub use store::{LimitStore, LimitStoreError, LimitStoreResult, MemoryLimitStore};
pub use sweep::Sweeper;
