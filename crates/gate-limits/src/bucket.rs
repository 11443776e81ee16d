//! Token bucket arithmetic
//!
//! Pure state transition shared by every [`crate::LimitStore`] backend. Times
//! are epoch milliseconds so the same numbers work in-process and in Redis.

use serde::{Deserialize, Serialize};

/// Bucket shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketParams {
    /// Maximum burst
    pub capacity: u32,
    /// Time to refill a full capacity
    pub window_ms: u64,
}

impl BucketParams {
    pub fn new(capacity: u32, window_ms: u64) -> Self {
        Self {
            capacity: capacity.max(1),
            window_ms: window_ms.max(1),
        }
    }

    /// Tokens added per millisecond
    #[inline]
    pub fn refill_rate(&self) -> f64 {
        self.capacity as f64 / self.window_ms as f64
    }
}

/// Per-identifier bucket state
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenBucketState {
    /// Current tokens, `0.0 ..= capacity`
    pub tokens: f64,
    pub last_refill_ms: i64,
}

/// Result of one take attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TakeOutcome {
    pub allowed: bool,
    /// Whole tokens left after the take
    pub remaining: u32,
    /// Allowed: bucket full again. Rejected: next token available.
    pub reset_at_ms: i64,
}

impl TokenBucketState {
    /// New buckets start full
    pub fn full(params: &BucketParams, now_ms: i64) -> Self {
        Self {
            tokens: params.capacity as f64,
            last_refill_ms: now_ms,
        }
    }

    /// Refill for elapsed time, then try to take one token
    pub fn take(&mut self, params: &BucketParams, now_ms: i64) -> TakeOutcome {
        let capacity = params.capacity as f64;
        let window = params.window_ms as f64;

        // clock going backwards adds nothing
        let elapsed = (now_ms - self.last_refill_ms).max(0) as f64;
        self.tokens = (self.tokens + elapsed * capacity / window).min(capacity).max(0.0);
        self.last_refill_ms = self.last_refill_ms.max(now_ms);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            let until_full = ((capacity - self.tokens) * window / capacity).ceil() as i64;
            TakeOutcome {
                allowed: true,
                remaining: self.tokens.floor() as u32,
                reset_at_ms: now_ms + until_full,
            }
        } else {
            let until_next = ((1.0 - self.tokens) * window / capacity).ceil() as i64;
            TakeOutcome {
                allowed: false,
                remaining: 0,
                reset_at_ms: now_ms + until_next,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const T0: i64 = 1_700_000_000_000;

    #[test]
    fn test_burst_then_reject() {
        let params = BucketParams::new(5, 60_000);
        let mut bucket = TokenBucketState::full(&params, T0);

        for expected in (0..5).rev() {
            let outcome = bucket.take(&params, T0);
            assert!(outcome.allowed);
            assert_eq!(outcome.remaining, expected);
        }

        let rejected = bucket.take(&params, T0);
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);
        // one token every 12s
        assert_eq!(rejected.reset_at_ms, T0 + 12_000);
        assert!(rejected.reset_at_ms - T0 <= 60_000);
    }

    #[test]
    fn test_refill_is_capped() {
        let params = BucketParams::new(10, 1_000);
        let mut bucket = TokenBucketState::full(&params, T0);
        bucket.take(&params, T0);

        let outcome = bucket.take(&params, T0 + 3_600_000);
        assert!(outcome.allowed);
        assert_eq!(outcome.remaining, 9);
        assert!(bucket.tokens <= 10.0);
    }

    #[test]
    fn test_clock_skew_adds_nothing() {
        let params = BucketParams::new(1, 1_000);
        let mut bucket = TokenBucketState::full(&params, T0);
        assert!(bucket.take(&params, T0).allowed);
        assert!(!bucket.take(&params, T0 - 5_000).allowed);
        assert_eq!(bucket.last_refill_ms, T0);
    }

    #[test]
    fn test_partial_refill() {
        let params = BucketParams::new(2, 1_000);
        let mut bucket = TokenBucketState::full(&params, T0);
        bucket.take(&params, T0);
        bucket.take(&params, T0);

        // 250ms at 2 tokens/s = 0.5 tokens
        let outcome = bucket.take(&params, T0 + 250);
        assert!(!outcome.allowed);
        assert_eq!(outcome.reset_at_ms, T0 + 500);
        assert!(bucket.take(&params, T0 + 500).allowed);
    }

    proptest! {
        #[test]
        fn prop_tokens_stay_in_bounds(
            capacity in 1u32..500,
            window_ms in 1u64..120_000,
            steps in proptest::collection::vec(-1_000i64..30_000, 1..200),
        ) {
            let params = BucketParams::new(capacity, window_ms);
            let mut bucket = TokenBucketState::full(&params, T0);
            let mut now = T0;
            for step in steps {
                now += step;
                bucket.take(&params, now);
                prop_assert!(bucket.tokens >= 0.0);
                prop_assert!(bucket.tokens <= capacity as f64);
            }
        }

        #[test]
        fn prop_no_more_than_capacity_in_window(
            capacity in 1u32..100,
            window_ms in 1_000u64..120_000,
            gaps in proptest::collection::vec(0i64..500, 1..400),
        ) {
            let params = BucketParams::new(capacity, window_ms);
            let mut bucket = TokenBucketState::full(&params, T0);
            let mut now = T0;
            let mut allowed_at = Vec::new();
            for gap in gaps {
                now += gap;
                if bucket.take(&params, now).allowed {
                    allowed_at.push(now);
                }
            }
            // capacity burst plus what refills during the span
            let span = (now - T0) as f64;
            let ceiling = capacity as f64 + span * params.refill_rate();
            prop_assert!(allowed_at.len() as f64 <= ceiling + 1e-6);
        }
    }
}
