//! Error taxonomy for the request gate
//!
//! Every stage of the pipeline short-circuits with one of these variants.
//! All of them are operational (expected, client-facing) except
//! [`GateError::CacheUnavailable`], which the resolver logs and recovers from.

use chrono::{DateTime, Utc};
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

/// Gate error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GateError {
    /// No resolution strategy matched and no fallback tenant is configured
    #[error("no tenant is registered for host '{host}'")]
    TenantNotFound {
        /// Normalized host that failed to resolve
        host: String,
    },

    /// A tenant matched but is not active
    #[error("tenant {tenant_id} is not active")]
    TenantInactive {
        /// Matched tenant id
        tenant_id: String,
    },

    /// Caller address is outside the tenant's IP allowlist
    #[error("address {ip} is not permitted for this tenant")]
    IpNotAllowed {
        /// Normalized caller address
        ip: IpAddr,
    },

    /// Caller role does not satisfy the route requirement
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Token bucket for this client and route is empty
    #[error("rate limit exceeded, retry after {}s", .retry_after.as_secs().max(1))]
    RateLimitExceeded {
        /// Bucket capacity
        limit: u32,
        /// Whole tokens left (always 0 on rejection)
        remaining: u32,
        /// Instant at which one token is available again
        reset_at: DateTime<Utc>,
        /// Back-off hint
        retry_after: Duration,
    },

    /// Too many failed authentication attempts for this client and account
    #[error("too many failed attempts, retry after {}s", .retry_after.as_secs().max(1))]
    BruteForceBlocked {
        /// End of the lockout
        blocked_until: DateTime<Utc>,
        /// Remaining lockout time
        retry_after: Duration,
    },

    /// Entity exists under another tenant (or not at all).
    ///
    /// Rendered identically to a missing resource so callers cannot discover
    /// other tenants' data.
    #[error("resource not found")]
    ForbiddenCrossTenantAccess {
        /// Model the caller tried to reach
        model: String,
    },

    /// Context cache backend failed; the resolver falls back to the store
    #[error("context cache unavailable: {0}")]
    CacheUnavailable(String),

    /// A backing store needed to make a decision is unreachable
    #[error("service temporarily unavailable: {0}")]
    StoreUnavailable(String),

    /// Request is missing information the gate needs
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl GateError {
    /// HTTP status class for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::TenantNotFound { .. } | Self::TenantInactive { .. } | Self::BadRequest(_) => 400,
            Self::IpNotAllowed { .. } | Self::Forbidden(_) => 403,
            Self::ForbiddenCrossTenantAccess { .. } => 404,
            Self::RateLimitExceeded { .. } | Self::BruteForceBlocked { .. } => 429,
            Self::CacheUnavailable(_) | Self::StoreUnavailable(_) => 503,
        }
    }

    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::TenantNotFound { .. } => "tenant_not_found",
            Self::TenantInactive { .. } => "tenant_inactive",
            Self::IpNotAllowed { .. } => "ip_not_allowed",
            Self::Forbidden(_) => "forbidden",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::BruteForceBlocked { .. } => "brute_force_blocked",
            Self::ForbiddenCrossTenantAccess { .. } => "not_found",
            Self::CacheUnavailable(_) => "cache_unavailable",
            Self::StoreUnavailable(_) => "service_unavailable",
            Self::BadRequest(_) => "bad_request",
        }
    }

    /// Expected, client-facing failure (as opposed to a degradation)
    pub fn is_operational(&self) -> bool {
        !matches!(self, Self::CacheUnavailable(_) | Self::StoreUnavailable(_))
    }

    /// Back-off hint for throttling errors
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimitExceeded { retry_after, .. }
            | Self::BruteForceBlocked { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Result type for gate operations
pub type GateResult<T> = Result<T, GateError>;
