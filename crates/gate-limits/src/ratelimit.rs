//! Rate Limiting
//!
//! Token bucket keyed by (route class, client network, optional tenant).

use crate::bucket::BucketParams;
use crate::store::LimitStore;
use chrono::{DateTime, Utc};
use gate_common::clock::until;
use gate_common::{ClientId, Clock, GateError, GateResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Per-route limit. `requests = -1` disables limiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitRule {
    pub requests: i64,
    #[serde(alias = "window_ms")]
    pub window_ms: u64,
}

impl RateLimitRule {
    pub const UNLIMITED: RateLimitRule = RateLimitRule { requests: -1, window_ms: 1 };

    pub const fn new(requests: i64, window_ms: u64) -> Self {
        Self { requests, window_ms }
    }

    pub const fn per_minute(requests: i64) -> Self {
        Self::new(requests, 60 * 1000)
    }

    pub const fn per_day(requests: i64) -> Self {
        Self::new(requests, 24 * 60 * 60 * 1000)
    }

    pub fn is_unlimited(&self) -> bool {
        self.requests == -1
    }

    /// Reject shapes the bucket cannot represent
    pub fn validate(&self) -> Result<(), String> {
        if self.is_unlimited() {
            return Ok(());
        }
        if self.requests < 1 || self.requests > u32::MAX as i64 {
            return Err(format!("requests must be -1 or in 1..={}, got {}", u32::MAX, self.requests));
        }
        if self.window_ms == 0 {
            return Err("window_ms must be positive".to_string());
        }
        Ok(())
    }
}

/// Accounting result for an admitted request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quota {
    /// No bucket applied (unlimited rule, or limiter backend unreachable)
    Unmetered,
    Metered {
        limit: u32,
        remaining: u32,
        /// Bucket full again
        reset_at: DateTime<Utc>,
    },
}

/// Bucket identity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateKey {
    scope: String,
    client: String,
    tenant: Option<String>,
}

impl RateKey {
    /// Key on the client's network (IPv4 address or IPv6 /64)
    pub fn new(scope: &str, client: &ClientId) -> Self {
        Self {
            scope: scope.to_string(),
            client: client.network().to_string(),
            tenant: None,
        }
    }

    /// Account per tenant as well as per client
    pub fn with_tenant(mut self, tenant: impl fmt::Display) -> Self {
        self.tenant = Some(tenant.to_string());
        self
    }
}

impl fmt::Display for RateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rl:{}:{}:{}",
            self.scope,
            self.tenant.as_deref().unwrap_or("-"),
            self.client
        )
    }
}

/// Token bucket rate limiter
pub struct RateLimiter {
    store: Arc<dyn LimitStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn LimitStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Take one token for `key` under `rule`
    pub async fn check(&self, key: &RateKey, rule: RateLimitRule) -> GateResult<Quota> {
        if rule.is_unlimited() {
            return Ok(Quota::Unmetered);
        }

        // never widen a malformed rule into a permissive one
        rule.validate()
            .map_err(|e| GateError::Forbidden(format!("rate limit misconfigured: {}", e)))?;
        let limit = rule.requests as u32;
        let params = BucketParams::new(limit, rule.window_ms);
        let now = self.clock.now();
        let key_str = key.to_string();

        let outcome = match self.store.take_token(&key_str, params, now.timestamp_millis()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // availability over accounting when the shared store is down
                warn!(key = %key_str, error = %e, "rate limit store unavailable, request not metered");
                return Ok(Quota::Unmetered);
            }
        };

        let reset_at = from_millis(outcome.reset_at_ms, now);
        if outcome.allowed {
            debug!(key = %key_str, remaining = outcome.remaining, limit, "rate limit check passed");
            Ok(Quota::Metered {
                limit,
                remaining: outcome.remaining,
                reset_at,
            })
        } else {
            let retry_after = until(now, reset_at).max(Duration::from_millis(1));
            debug!(key = %key_str, retry_after_ms = retry_after.as_millis() as u64, "rate limit exceeded");
            Err(GateError::RateLimitExceeded {
                limit,
                remaining: 0,
                reset_at,
                retry_after,
            })
        }
    }
}

fn from_millis(ms: i64, fallback: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(fallback)
}
