//! Tenant Data Model

use chrono::{DateTime, Utc};
use gate_common::IpAllowlist;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Tenant ID
pub type TenantId = Uuid;

/// Resolved tenant context.
///
/// Immutable once built: a configuration change produces a new context and
/// invalidates the cached one. Requests hold it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantContext {
    /// Unique tenant ID
    pub tenant_id: TenantId,
    /// Display name
    pub name: String,
    /// Registered custom domain (normalized)
    pub domain: Option<String>,
    /// Subdomain label under the platform base domain
    pub subdomain: Option<String>,
    /// Lifecycle status
    pub status: TenantStatus,
    /// Subscription tier
    pub tier: TenantTier,
    /// Branding, locale, currency
    pub settings: TenantSettings,
    /// Feature flags
    #[serde(default)]
    pub features: FeatureFlags,
    /// Usage limits
    #[serde(default)]
    pub limits: UsageLimits,
    /// Security policy
    #[serde(default)]
    pub security: SecurityPolicy,
    /// Last configuration change
    pub updated_at: DateTime<Utc>,
}

impl TenantContext {
    /// Create new active tenant
    pub fn new(name: &str, tier: TenantTier) -> Self {
        Self {
            tenant_id: Uuid::new_v4(),
            name: name.to_string(),
            domain: None,
            subdomain: None,
            status: TenantStatus::Active,
            tier,
            settings: TenantSettings::default(),
            features: FeatureFlags::default(),
            limits: UsageLimits::default(),
            security: SecurityPolicy::default(),
            updated_at: Utc::now(),
        }
    }

    /// Use a fixed id
    pub fn with_id(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = tenant_id;
        self
    }

    /// Register a custom domain
    pub fn with_domain(mut self, domain: &str) -> Self {
        self.domain = Some(normalize_host(domain));
        self
    }

    /// Register a subdomain label
    pub fn with_subdomain(mut self, label: &str) -> Self {
        self.subdomain = Some(label.trim().to_ascii_lowercase());
        self
    }

    /// Set status
    pub fn with_status(mut self, status: TenantStatus) -> Self {
        self.status = status;
        self
    }

    /// Set security policy
    pub fn with_security(mut self, security: SecurityPolicy) -> Self {
        self.security = security;
        self
    }

    /// Set usage limits
    pub fn with_limits(mut self, limits: UsageLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Enable or disable a feature flag
    pub fn with_feature(mut self, name: &str, enabled: bool) -> Self {
        self.features.0.insert(name.to_string(), enabled);
        self
    }

    /// Whether requests may be served for this tenant
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// Tenant lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    Pending,
    Active,
    Suspended,
    Deleted,
}

impl TenantStatus {
    /// Only `Active` tenants are served
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Subscription tier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TenantTier {
    Free,
    Basic,
    Pro,
    Enterprise,
}

impl TenantTier {
    /// Stable name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Basic => "basic",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        }
    }
}

/// Presentation settings, opaque to the gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantSettings {
    pub branding: BrandingConfig,
    pub locale: String,
    pub currency: String,
}

impl Default for TenantSettings {
    fn default() -> Self {
        Self {
            branding: BrandingConfig::default(),
            locale: "en-US".to_string(),
            currency: "USD".to_string(),
        }
    }
}

/// Branding configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrandingConfig {
    pub logo_url: Option<String>,
    pub primary_color: String,
    pub site_title: Option<String>,
}

impl Default for BrandingConfig {
    fn default() -> Self {
        Self {
            logo_url: None,
            primary_color: "#0066cc".to_string(),
            site_title: None,
        }
    }
}

/// Named feature switches
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureFlags(pub BTreeMap<String, bool>);

impl FeatureFlags {
    /// Unknown flags are off
    pub fn is_enabled(&self, name: &str) -> bool {
        self.0.get(name).copied().unwrap_or(false)
    }
}

/// Usage limits. `None` defers to the tier defaults in the gate config;
/// `Some(-1)` means unlimited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageLimits {
    pub max_listings: Option<i64>,
    pub ai_requests_per_day: Option<i64>,
    pub max_team_members: Option<i64>,
}

/// Tenant security policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityPolicy {
    /// Permitted caller networks; empty means unrestricted
    #[serde(default)]
    pub ip_allowlist: IpAllowlist,
    /// Session idle timeout
    pub session_timeout_minutes: u32,
    /// Password rules enforced by the auth layer
    pub password_policy: PasswordPolicy,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            ip_allowlist: IpAllowlist::default(),
            session_timeout_minutes: 60,
            password_policy: PasswordPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub require_uppercase: bool,
    pub require_digit: bool,
    pub require_special: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 10,
            require_uppercase: true,
            require_digit: true,
            require_special: false,
        }
    }
}

/// Normalize a host header: lowercase, no port, no trailing dot.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let host = if host.starts_with('[') {
        // IPv6 literal, keep brackets, drop port
        match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        }
    } else {
        match host.rsplit_once(':') {
            Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
            _ => host,
        }
    };
    host.trim_end_matches('.').to_ascii_lowercase()
}
