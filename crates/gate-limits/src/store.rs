//! Limit state storage
//!
//! Every read-modify-write on a bucket or failure record is one atomic step
//! per key. [`MemoryLimitStore`] gets that from the DashMap shard lock held by
//! an entry guard; the Redis store runs each step as a Lua script.

use crate::bucket::{BucketParams, TakeOutcome, TokenBucketState};
use crate::failure::{BruteForcePolicy, FailureRecord, RecordState};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;

/// Limit store errors
#[derive(Debug, Clone, Error)]
pub enum LimitStoreError {
    #[error("limit store backend error: {0}")]
    Backend(String),

    #[error("limit store returned malformed state for {key}")]
    Corrupt { key: String },
}

pub type LimitStoreResult<T> = Result<T, LimitStoreError>;

/// Atomic per-key limiter state
#[async_trait]
pub trait LimitStore: Send + Sync {
    /// Refill and take one token from the bucket at `key`
    async fn take_token(&self, key: &str, params: BucketParams, now_ms: i64) -> LimitStoreResult<TakeOutcome>;

    /// Live failure record for `key`; expired records are dropped
    async fn failure_status(
        &self,
        key: &str,
        policy: &BruteForcePolicy,
        now_ms: i64,
    ) -> LimitStoreResult<Option<FailureRecord>>;

    /// Count one failure and return the updated record
    async fn record_failure(&self, key: &str, policy: &BruteForcePolicy, now_ms: i64) -> LimitStoreResult<FailureRecord>;

    /// Forget the failure record for `key`
    async fn clear_failures(&self, key: &str) -> LimitStoreResult<()>;

    /// Drop idle state; returns the number of entries removed
    async fn sweep(&self, now_ms: i64) -> LimitStoreResult<usize>;
}

#[derive(Debug, Clone, Copy)]
struct BucketEntry {
    state: TokenBucketState,
    /// Idle for a full window means the bucket is full again
    expires_at_ms: i64,
}

#[derive(Debug, Clone, Copy)]
struct FailureEntry {
    record: FailureRecord,
    expires_at_ms: i64,
}

/// In-process store for single-instance deployments
#[derive(Default)]
pub struct MemoryLimitStore {
    buckets: DashMap<String, BucketEntry>,
    failures: DashMap<String, FailureEntry>,
}

impl MemoryLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }
}

#[async_trait]
impl LimitStore for MemoryLimitStore {
    async fn take_token(&self, key: &str, params: BucketParams, now_ms: i64) -> LimitStoreResult<TakeOutcome> {
        let mut entry = self.buckets.entry(key.to_string()).or_insert_with(|| BucketEntry {
            state: TokenBucketState::full(&params, now_ms),
            expires_at_ms: now_ms,
        });
        let outcome = entry.state.take(&params, now_ms);
        entry.expires_at_ms = entry.state.last_refill_ms + params.window_ms as i64;
        Ok(outcome)
    }

    async fn failure_status(
        &self,
        key: &str,
        policy: &BruteForcePolicy,
        now_ms: i64,
    ) -> LimitStoreResult<Option<FailureRecord>> {
        let record = match self.failures.get(key) {
            Some(entry) => entry.record,
            None => return Ok(None),
        };
        if record.state(policy, now_ms) == RecordState::Expired {
            self.failures
                .remove_if(key, |_, e| e.record.state(policy, now_ms) == RecordState::Expired);
            return Ok(None);
        }
        Ok(Some(record))
    }

    async fn record_failure(&self, key: &str, policy: &BruteForcePolicy, now_ms: i64) -> LimitStoreResult<FailureRecord> {
        let record = match self.failures.entry(key.to_string()) {
            Entry::Occupied(mut slot) => {
                let record = FailureRecord::after_failure(Some(&slot.get().record), policy, now_ms);
                slot.insert(FailureEntry {
                    record,
                    expires_at_ms: record.expires_at_ms(policy),
                });
                record
            }
            Entry::Vacant(slot) => {
                let record = FailureRecord::after_failure(None, policy, now_ms);
                slot.insert(FailureEntry {
                    record,
                    expires_at_ms: record.expires_at_ms(policy),
                });
                record
            }
        };
        Ok(record)
    }

    async fn clear_failures(&self, key: &str) -> LimitStoreResult<()> {
        self.failures.remove(key);
        Ok(())
    }

    async fn sweep(&self, now_ms: i64) -> LimitStoreResult<usize> {
        let before = self.buckets.len() + self.failures.len();
        self.buckets.retain(|_, e| e.expires_at_ms > now_ms);
        self.failures.retain(|_, e| e.expires_at_ms > now_ms);
        let after = self.buckets.len() + self.failures.len();
        Ok(before.saturating_sub(after))
    }
}
