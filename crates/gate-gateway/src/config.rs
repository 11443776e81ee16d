//! Gate Configuration
//!
//! Loaded from TOML. Every section is optional; missing values take the
//! defaults below.
//!
//! ```toml
//! sweep_probability = 0.01
//! trust_forwarded_for = false
//!
//! [tenancy]
//! base_domain = "example.com"
//! cache_ttl_ms = 300000
//!
//! [rate_limits]
//! auth = { requests = 5, windowMs = 60000 }
//! api = { requests = 100, windowMs = 60000 }
//!
//! [rate_limits.ai]
//! enterprise = { requests = -1, windowMs = 86400000 }
//!
//! [brute_force.login]
//! maxAttempts = 5
//! windowMs = 900000
//! blockDurationMs = 900000
//!
//! [[routes]]
//! prefix = "/api/auth/login"
//! class = "login"
//! ```

use crate::route::{default_routes, RouteRule};
use gate_common::IpAllowlist;
use gate_limits::{BruteForceConfig, RateLimitRule};
use gate_tenant::model::TenantStatus;
use gate_tenant::{
    CacheConfig, FallbackPolicy, ResolverConfig, TenantContext, TenantId, TenantTier, UsageLimits,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Listen address for the gateway binary
    pub listen: SocketAddr,
    pub tenancy: TenancyConfig,
    pub rate_limits: RateLimitsConfig,
    pub brute_force: BruteForceConfig,
    pub routes: Vec<RouteRule>,
    /// Share of requests that trigger an idle-state sweep
    pub sweep_probability: f64,
    /// Take the client address from `X-Forwarded-For` (only behind a trusted proxy)
    pub trust_forwarded_for: bool,
    /// Shared limit store; in-process when unset
    pub redis_url: Option<String>,
    /// Development tenants loaded into the in-memory store
    pub seed_tenants: Vec<SeedTenant>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            tenancy: TenancyConfig::default(),
            rate_limits: RateLimitsConfig::default(),
            brute_force: BruteForceConfig::default(),
            routes: default_routes(),
            sweep_probability: gate_limits::sweep::DEFAULT_SWEEP_PROBABILITY,
            trust_forwarded_for: false,
            redis_url: None,
            seed_tenants: Vec::new(),
        }
    }
}

impl GateConfig {
    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the gate cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = &self.rate_limits;
        let rules = [
            ("rate_limits.auth", limits.auth),
            ("rate_limits.api", limits.api),
            ("rate_limits.admin", limits.admin),
            ("rate_limits.ai.free", limits.ai.free),
            ("rate_limits.ai.basic", limits.ai.basic),
            ("rate_limits.ai.pro", limits.ai.pro),
            ("rate_limits.ai.enterprise", limits.ai.enterprise),
        ];
        for (name, rule) in rules {
            rule.validate()
                .map_err(|e| ConfigError::Invalid(format!("{}: {}", name, e)))?;
        }

        for (name, policy) in [
            ("brute_force.login", &self.brute_force.login),
            ("brute_force.password_reset", &self.brute_force.password_reset),
        ] {
            if policy.max_attempts == 0 {
                return Err(ConfigError::Invalid(format!("{}: maxAttempts must be positive", name)));
            }
            if policy.window_ms == 0 || policy.block_duration_ms == 0 {
                return Err(ConfigError::Invalid(format!("{}: durations must be positive", name)));
            }
        }

        if !(0.0..=1.0).contains(&self.sweep_probability) {
            return Err(ConfigError::Invalid(format!(
                "sweep_probability must be within [0, 1], got {}",
                self.sweep_probability
            )));
        }

        let tenancy = &self.tenancy;
        if tenancy.cache_ttl_ms == 0 || tenancy.lookup_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "tenancy.cache_ttl_ms and tenancy.lookup_timeout_ms must be positive".into(),
            ));
        }
        if !tenancy.path_prefix.starts_with('/') {
            return Err(ConfigError::Invalid("tenancy.path_prefix must start with '/'".into()));
        }

        for seed in &self.seed_tenants {
            // 0 disables AI features for the tenant
            if let Some(per_day) = seed.ai_requests_per_day.filter(|n| *n != 0) {
                RateLimitRule::per_day(per_day).validate().map_err(|e| {
                    ConfigError::Invalid(format!("seed tenant '{}': ai_requests_per_day: {}", seed.name, e))
                })?;
            }
        }

        if let Some(rule) = self.routes.iter().find(|r| !r.prefix.starts_with('/')) {
            return Err(ConfigError::Invalid(format!(
                "route prefix '{}' must start with '/'",
                rule.prefix
            )));
        }

        Ok(())
    }
}

/// `[tenancy]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TenancyConfig {
    pub base_domain: Option<String>,
    pub path_prefix: String,
    pub reserved_subdomains: Vec<String>,
    pub cache_ttl_ms: u64,
    pub cache_capacity: u64,
    pub lookup_timeout_ms: u64,
    /// How long past TTL a cached tenant may be served while the store is down
    pub max_staleness_ms: u64,
    /// Opt-in single-tenant fallback
    pub fallback_tenant: Option<TenantId>,
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            base_domain: None,
            path_prefix: "/tenant/".to_string(),
            reserved_subdomains: vec!["www".to_string()],
            cache_ttl_ms: 5 * 60 * 1000,
            cache_capacity: 10_000,
            lookup_timeout_ms: 500,
            max_staleness_ms: 60 * 1000,
            fallback_tenant: None,
        }
    }
}

impl TenancyConfig {
    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            base_domain: self.base_domain.clone(),
            path_prefix: self.path_prefix.clone(),
            reserved_subdomains: self.reserved_subdomains.clone(),
            lookup_timeout: Duration::from_millis(self.lookup_timeout_ms),
            fallback: match self.fallback_tenant {
                Some(id) => FallbackPolicy::Tenant(id),
                None => FallbackPolicy::Disabled,
            },
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            ttl: Duration::from_millis(self.cache_ttl_ms),
            max_staleness: Duration::from_millis(self.max_staleness_ms),
            capacity: self.cache_capacity,
        }
    }
}

/// `[rate_limits]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitsConfig {
    /// Login and password reset
    pub auth: RateLimitRule,
    pub api: RateLimitRule,
    pub admin: RateLimitRule,
    pub ai: AiLimits,
    /// Include the tenant in every bucket key, not just AI ones
    pub tenant_aware: bool,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            auth: RateLimitRule::per_minute(5),
            api: RateLimitRule::per_minute(100),
            admin: RateLimitRule::per_minute(60),
            ai: AiLimits::default(),
            tenant_aware: false,
        }
    }
}

/// AI-feature limits per subscription tier
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct AiLimits {
    pub free: RateLimitRule,
    pub basic: RateLimitRule,
    pub pro: RateLimitRule,
    pub enterprise: RateLimitRule,
}

impl Default for AiLimits {
    fn default() -> Self {
        Self {
            free: RateLimitRule::per_day(5),
            basic: RateLimitRule::per_day(50),
            pro: RateLimitRule::per_day(500),
            enterprise: RateLimitRule::UNLIMITED,
        }
    }
}

impl AiLimits {
    pub fn for_tier(&self, tier: TenantTier) -> RateLimitRule {
        match tier {
            TenantTier::Free => self.free,
            TenantTier::Basic => self.basic,
            TenantTier::Pro => self.pro,
            TenantTier::Enterprise => self.enterprise,
        }
    }
}

fn default_status() -> TenantStatus {
    TenantStatus::Active
}

/// `[[seed_tenants]]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedTenant {
    pub id: Option<TenantId>,
    pub name: String,
    pub tier: TenantTier,
    pub domain: Option<String>,
    pub subdomain: Option<String>,
    #[serde(default = "default_status")]
    pub status: TenantStatus,
    #[serde(default)]
    pub ip_allowlist: IpAllowlist,
    pub ai_requests_per_day: Option<i64>,
}

impl SeedTenant {
    pub fn into_context(self) -> TenantContext {
        let mut tenant = TenantContext::new(&self.name, self.tier).with_status(self.status);
        if let Some(id) = self.id {
            tenant = tenant.with_id(id);
        }
        if let Some(domain) = &self.domain {
            tenant = tenant.with_domain(domain);
        }
        if let Some(label) = &self.subdomain {
            tenant = tenant.with_subdomain(label);
        }
        tenant.security.ip_allowlist = self.ip_allowlist;
        tenant.with_limits(UsageLimits {
            ai_requests_per_day: self.ai_requests_per_day,
            ..UsageLimits::default()
        })
    }
}
