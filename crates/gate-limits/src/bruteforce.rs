//! Brute-force lockout for authentication flows
//!
//! Failures are tracked per (flow, account, client), the client being its
//! network and header fingerprint together, against the flow's policy. A
//! second count per (flow, account, fingerprint) uses a threshold
//! [`FINGERPRINT_ATTEMPT_FACTOR`] times higher, so rotating addresses does
//! not reset the count forever while one noisy network cannot lock out
//! other networks that send the same common headers.

use crate::failure::{BruteForcePolicy, FailureRecord, RecordState};
use crate::store::LimitStore;
use chrono::{DateTime, Utc};
use gate_common::clock::until;
use gate_common::{ClientId, Clock, GateError, GateResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};

/// Multiplier on `max_attempts` for the fingerprint-wide count
pub const FINGERPRINT_ATTEMPT_FACTOR: u32 = 4;

/// Authentication-sensitive flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthFlow {
    Login,
    PasswordReset,
}

impl AuthFlow {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::PasswordReset => "password_reset",
        }
    }
}

/// Thresholds per flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BruteForceConfig {
    #[serde(default = "BruteForcePolicy::login")]
    pub login: BruteForcePolicy,
    #[serde(default = "BruteForcePolicy::password_reset")]
    pub password_reset: BruteForcePolicy,
}

impl Default for BruteForceConfig {
    fn default() -> Self {
        Self {
            login: BruteForcePolicy::login(),
            password_reset: BruteForcePolicy::password_reset(),
        }
    }
}

impl BruteForceConfig {
    pub fn policy(&self, flow: AuthFlow) -> &BruteForcePolicy {
        match flow {
            AuthFlow::Login => &self.login,
            AuthFlow::PasswordReset => &self.password_reset,
        }
    }
}

/// Pre-attempt standing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptStatus {
    /// Failures by this client in the current window
    pub failures: u32,
    pub remaining_attempts: u32,
}

/// Standing after a recorded failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOutcome {
    pub failures: u32,
    pub blocked_until: Option<DateTime<Utc>>,
}

pub struct BruteForceGuard {
    store: Arc<dyn LimitStore>,
    clock: Arc<dyn Clock>,
    config: BruteForceConfig,
}

impl BruteForceGuard {
    pub fn new(store: Arc<dyn LimitStore>, clock: Arc<dyn Clock>, config: BruteForceConfig) -> Self {
        Self { store, clock, config }
    }

    pub fn config(&self) -> &BruteForceConfig {
        &self.config
    }

    /// Reject while either count for this pair is locked out
    pub async fn check(&self, flow: AuthFlow, client: &ClientId, account: &str) -> GateResult<AttemptStatus> {
        let now = self.clock.now();
        let now_ms = now.timestamp_millis();

        let mut status = AttemptStatus {
            failures: 0,
            remaining_attempts: u32::MAX,
        };
        for (i, (key, policy)) in self.tracked(flow, client, account).iter().enumerate() {
            let record = self
                .store
                .failure_status(key, policy, now_ms)
                .await
                .map_err(|e| GateError::StoreUnavailable(e.to_string()))?;

            let count = match record {
                Some(record) => {
                    if let RecordState::Blocked(until_ms) = record.state(policy, now_ms) {
                        let blocked_until = DateTime::from_timestamp_millis(until_ms).unwrap_or(now);
                        return Err(GateError::BruteForceBlocked {
                            blocked_until,
                            retry_after: until(now, blocked_until),
                        });
                    }
                    record.count
                }
                None => 0,
            };
            // the pair count is the one reported
            if i == 0 {
                status.failures = count;
            }
            status.remaining_attempts = status
                .remaining_attempts
                .min(policy.max_attempts.saturating_sub(count));
        }

        Ok(status)
    }

    /// Count a failed attempt against both tracked counts
    pub async fn record_failure(&self, flow: AuthFlow, client: &ClientId, account: &str) -> GateResult<FailureOutcome> {
        let now_ms = self.clock.now().timestamp_millis();

        let mut records: Vec<FailureRecord> = Vec::with_capacity(2);
        for (key, policy) in &self.tracked(flow, client, account) {
            let record = self
                .store
                .record_failure(key, policy, now_ms)
                .await
                .map_err(|e| GateError::StoreUnavailable(e.to_string()))?;
            records.push(record);
        }

        let failures = records.first().map(|r| r.count).unwrap_or(0);
        let blocked_until = records
            .iter()
            .filter_map(|r| r.blocked_until_ms)
            .max()
            .and_then(DateTime::from_timestamp_millis);

        if let Some(until) = blocked_until {
            warn!(
                flow = flow.as_str(),
                client = %client,
                failures,
                blocked_until = %until,
                "authentication locked out"
            );
        }

        Ok(FailureOutcome { failures, blocked_until })
    }

    /// Successful authentication clears the pair entirely
    pub async fn record_success(&self, flow: AuthFlow, client: &ClientId, account: &str) -> GateResult<()> {
        for (key, _) in &self.tracked(flow, client, account) {
            self.store
                .clear_failures(key)
                .await
                .map_err(|e| GateError::StoreUnavailable(e.to_string()))?;
        }
        info!(flow = flow.as_str(), client = %client, "authentication succeeded, failures cleared");
        Ok(())
    }

    /// Pair key under the flow policy, then the fingerprint-wide key
    fn tracked(&self, flow: AuthFlow, client: &ClientId, account: &str) -> [(String, BruteForcePolicy); 2] {
        let policy = *self.config.policy(flow);
        let account = account_digest(account);
        let wide = BruteForcePolicy {
            max_attempts: policy.max_attempts.saturating_mul(FINGERPRINT_ATTEMPT_FACTOR),
            ..policy
        };
        [
            (format!("bf:{}:{}:{}", flow.as_str(), account, client.tracking_key()), policy),
            (format!("bf:{}:{}:fp:{}", flow.as_str(), account, client.fingerprint()), wide),
        ]
    }
}

/// Accounts are stored hashed and case-folded
fn account_digest(account: &str) -> String {
    let digest = Sha256::digest(account.trim().to_lowercase().as_bytes());
    hex::encode(&digest[..8])
}
