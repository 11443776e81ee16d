//! Failure records for brute-force lockout
//!
//! A record counts failures inside a sliding window anchored to the first
//! failure of the current streak. Reaching `max_attempts` inside the window
//! blocks the record until `blocked_until`; after that, or after a window
//! with no block, the record starts over.

use serde::{Deserialize, Serialize};

/// Lockout thresholds for one authentication flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BruteForcePolicy {
    #[serde(alias = "max_attempts")]
    pub max_attempts: u32,
    #[serde(alias = "window_ms")]
    pub window_ms: u64,
    #[serde(alias = "block_duration_ms")]
    pub block_duration_ms: u64,
}

impl BruteForcePolicy {
    /// 5 attempts / 15 min, 15 min lockout
    pub const fn login() -> Self {
        Self {
            max_attempts: 5,
            window_ms: 15 * 60 * 1000,
            block_duration_ms: 15 * 60 * 1000,
        }
    }

    /// 3 attempts / 1 h, 1 h lockout
    pub const fn password_reset() -> Self {
        Self {
            max_attempts: 3,
            window_ms: 60 * 60 * 1000,
            block_duration_ms: 60 * 60 * 1000,
        }
    }
}

/// Failure streak for one (client, account) key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub count: u32,
    pub first_attempt_ms: i64,
    pub last_attempt_ms: i64,
    pub blocked_until_ms: Option<i64>,
}

/// Where a record stands at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    /// Counting failures inside the window
    Active,
    /// Locked out until the contained instant
    Blocked(i64),
    /// Window or block elapsed; the record should be discarded
    Expired,
}

impl FailureRecord {
    fn first(policy: &BruteForcePolicy, now_ms: i64) -> Self {
        let mut record = Self {
            count: 1,
            first_attempt_ms: now_ms,
            last_attempt_ms: now_ms,
            blocked_until_ms: None,
        };
        record.block_if_exhausted(policy, now_ms);
        record
    }

    pub fn state(&self, policy: &BruteForcePolicy, now_ms: i64) -> RecordState {
        match self.blocked_until_ms {
            Some(until) if now_ms < until => RecordState::Blocked(until),
            Some(_) => RecordState::Expired,
            None if now_ms - self.first_attempt_ms >= policy.window_ms as i64 => RecordState::Expired,
            None => RecordState::Active,
        }
    }

    /// Record after one more failure at `now_ms`
    pub fn after_failure(previous: Option<&FailureRecord>, policy: &BruteForcePolicy, now_ms: i64) -> Self {
        let Some(previous) = previous else {
            return Self::first(policy, now_ms);
        };
        match previous.state(policy, now_ms) {
            RecordState::Expired => Self::first(policy, now_ms),
            // failures during a lockout neither extend nor reset it
            RecordState::Blocked(_) => *previous,
            RecordState::Active => {
                let mut record = *previous;
                record.count = record.count.saturating_add(1);
                record.last_attempt_ms = now_ms;
                record.block_if_exhausted(policy, now_ms);
                record
            }
        }
    }

    /// Instant after which the record carries no information
    pub fn expires_at_ms(&self, policy: &BruteForcePolicy) -> i64 {
        self.blocked_until_ms
            .unwrap_or(self.first_attempt_ms + policy.window_ms as i64)
    }

    /// Attempts left before lockout
    pub fn remaining_attempts(&self, policy: &BruteForcePolicy) -> u32 {
        policy.max_attempts.saturating_sub(self.count)
    }

    fn block_if_exhausted(&mut self, policy: &BruteForcePolicy, now_ms: i64) {
        if self.count >= policy.max_attempts {
            self.blocked_until_ms = Some(now_ms + policy.block_duration_ms as i64);
        }
    }
}
