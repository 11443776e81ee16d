//! Tenant resolution
//!
//! Strategies run in a fixed order and the first match wins:
//!
//! 1. exact custom domain
//! 2. left-most host label as a subdomain (`www` and other reserved labels skipped)
//! 3. `/tenant/<id>` path prefix
//! 4. configured fallback tenant (opt-in, logged on every use)
//!
//! Each strategy is settled before the next one is tried: a cache hit wins,
//! a remembered miss moves on, anything else goes to the store. Store lookups
//! are bounded by a timeout. When the store is unreachable the resolver keeps
//! walking the strategies on recently expired cache data inside the staleness
//! bound and fails closed at the first one it cannot settle.

use crate::cache::{CacheKey, Cached, TenantCache};
use crate::model::{normalize_host, TenantContext, TenantId};
use crate::store::{StoreError, StoreResult, TenantStore};
use gate_common::{GateError, GateResult};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// What to do when no strategy matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackPolicy {
    /// Reject with `TenantNotFound`
    #[default]
    Disabled,
    /// Serve this tenant. Only meant for single-tenant bootstrapping.
    Tenant(TenantId),
}

/// Resolver configuration
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Platform base domain (`example.com`); subdomain labels are taken relative to it
    pub base_domain: Option<String>,
    /// Path prefix followed by a tenant id
    pub path_prefix: String,
    /// Labels never treated as tenant subdomains
    pub reserved_subdomains: Vec<String>,
    /// Bound on a single store lookup
    pub lookup_timeout: Duration,
    pub fallback: FallbackPolicy,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            base_domain: None,
            path_prefix: "/tenant/".to_string(),
            reserved_subdomains: vec!["www".to_string()],
            lookup_timeout: Duration::from_millis(500),
            fallback: FallbackPolicy::Disabled,
        }
    }
}

/// Strategy that produced a resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    CustomDomain,
    Subdomain,
    PathPrefix,
    Fallback,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CustomDomain => "custom_domain",
            Self::Subdomain => "subdomain",
            Self::PathPrefix => "path_prefix",
            Self::Fallback => "fallback",
        }
    }
}

/// Resolved tenant plus how it was found
#[derive(Debug, Clone)]
pub struct Resolution {
    pub tenant: Arc<TenantContext>,
    pub strategy: Strategy,
    /// Served from an expired cache entry during a store outage
    pub stale: bool,
}

/// Host/path to tenant resolver
pub struct TenantResolver {
    store: Arc<dyn TenantStore>,
    cache: Arc<dyn TenantCache>,
    config: ResolverConfig,
}

impl TenantResolver {
    pub fn new(store: Arc<dyn TenantStore>, cache: Arc<dyn TenantCache>, config: ResolverConfig) -> Self {
        if let FallbackPolicy::Tenant(id) = config.fallback {
            warn!(
                tenant_id = %id,
                "fallback tenant enabled; unmatched hosts will be served as this tenant"
            );
        }
        let base_domain = config.base_domain.as_deref().map(normalize_host);
        Self {
            store,
            cache,
            config: ResolverConfig { base_domain, ..config },
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve the tenant owning `host` + `path`
    pub async fn resolve(&self, host: &str, path: &str) -> GateResult<Resolution> {
        let host = normalize_host(host);
        let candidates = self.candidates(&host, path);

        let generation = match self.cache.generation() {
            Ok(g) => Some(g),
            Err(e) => {
                warn!(error = %e, "context cache unavailable, resolving from store");
                None
            }
        };

        for (index, (strategy, key)) in candidates.iter().enumerate() {
            if generation.is_some() {
                match self.cache.lookup(key) {
                    Ok(Cached::Hit(tenant)) => {
                        debug!(host = %host, tenant_id = %tenant.tenant_id, strategy = strategy.as_str(), "tenant cache hit");
                        return self.admit(tenant, *strategy, false);
                    }
                    Ok(Cached::Absent) => continue,
                    Ok(Cached::Unknown) => {}
                    Err(e) => warn!(error = %e, key = %key, "context cache unavailable, falling back to store"),
                }
            }

            match self.fetch(key).await {
                Ok(Some(ctx)) => {
                    let tenant = Arc::new(ctx);
                    if let Some(generation) = generation {
                        self.populate(&tenant, generation);
                    }
                    debug!(host = %host, tenant_id = %tenant.tenant_id, strategy = strategy.as_str(), "tenant resolved from store");
                    return self.admit(tenant, *strategy, false);
                }
                Ok(None) => {
                    if let Some(generation) = generation {
                        self.remember_absent(key, generation);
                    }
                }
                Err(err) => return self.degrade(&candidates[index..], &host, err),
            }
        }

        Err(GateError::TenantNotFound { host })
    }

    /// Drop every cache entry for a tenant identity
    pub fn invalidate(&self, id: TenantId, domain: Option<&str>, subdomain: Option<&str>) -> GateResult<()> {
        let domain = domain.map(normalize_host);
        let subdomain = subdomain.map(|s| s.trim().to_ascii_lowercase());
        let keys = CacheKey::for_identity(id, domain.as_deref(), subdomain.as_deref());
        self.cache.invalidate(&keys)?;
        debug!(tenant_id = %id, keys = keys.len(), "tenant cache invalidated");
        Ok(())
    }

    /// Invalidate using the identity carried by a context
    pub fn invalidate_tenant(&self, tenant: &TenantContext) -> GateResult<()> {
        self.invalidate(tenant.tenant_id, tenant.domain.as_deref(), tenant.subdomain.as_deref())
    }

    fn candidates(&self, host: &str, path: &str) -> Vec<(Strategy, CacheKey)> {
        let mut candidates = Vec::with_capacity(4);
        if !host.is_empty() {
            candidates.push((Strategy::CustomDomain, CacheKey::Domain(host.to_string())));
        }
        if let Some(label) = self.subdomain_label(host) {
            candidates.push((Strategy::Subdomain, CacheKey::Subdomain(label)));
        }
        if let Some(id) = self.path_tenant(path) {
            candidates.push((Strategy::PathPrefix, CacheKey::Id(id)));
        }
        if let FallbackPolicy::Tenant(id) = self.config.fallback {
            candidates.push((Strategy::Fallback, CacheKey::Id(id)));
        }
        candidates
    }

    fn subdomain_label(&self, host: &str) -> Option<String> {
        if host.is_empty() || host.starts_with('[') || host.parse::<IpAddr>().is_ok() {
            return None;
        }

        let label = match &self.config.base_domain {
            Some(base) => {
                let rest = host.strip_suffix(base.as_str())?.strip_suffix('.')?;
                rest.split('.').next()?
            }
            None => {
                let mut labels = host.split('.');
                let first = labels.next()?;
                // bare `name.tld` hosts carry no subdomain
                if labels.count() < 2 {
                    return None;
                }
                first
            }
        };

        if label.is_empty() || self.config.reserved_subdomains.iter().any(|r| r == label) {
            return None;
        }
        Some(label.to_string())
    }

    fn path_tenant(&self, path: &str) -> Option<TenantId> {
        let rest = path.strip_prefix(self.config.path_prefix.as_str())?;
        rest.split('/').next()?.parse().ok()
    }

    async fn fetch(&self, key: &CacheKey) -> StoreResult<Option<TenantContext>> {
        let timeout = self.config.lookup_timeout;
        let lookup = async {
            match key {
                CacheKey::Domain(domain) => self.store.find_by_domain(domain).await,
                CacheKey::Subdomain(label) => self.store.find_by_subdomain(label).await,
                CacheKey::Id(id) => self.store.find_by_id(id).await,
            }
        };
        match tokio::time::timeout(timeout, lookup).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(timeout)),
        }
    }

    fn populate(&self, tenant: &Arc<TenantContext>, generation: u64) {
        match self.cache.insert(tenant.clone(), generation) {
            Ok(true) => {}
            Ok(false) => debug!(tenant_id = %tenant.tenant_id, "invalidated during lookup, not cached"),
            Err(e) => warn!(error = %e, "context cache unavailable, result not cached"),
        }
    }

    fn remember_absent(&self, key: &CacheKey, generation: u64) {
        if let Err(e) = self.cache.insert_absent(key, generation) {
            warn!(error = %e, key = %key, "context cache unavailable, miss not cached");
        }
    }

    /// Store failed at `remaining[0]`: continue in strategy order on
    /// bounded-stale cache data alone, failing closed at the first key whose
    /// answer is unknown.
    fn degrade(&self, remaining: &[(Strategy, CacheKey)], host: &str, err: StoreError) -> GateResult<Resolution> {
        for (strategy, key) in remaining {
            if *strategy == Strategy::Fallback {
                break;
            }
            match self.cache.lookup_stale(key) {
                Ok(Cached::Hit(tenant)) => {
                    warn!(
                        host = %host,
                        tenant_id = %tenant.tenant_id,
                        error = %err,
                        "tenant store unavailable, serving stale context"
                    );
                    return self.admit(tenant, *strategy, true);
                }
                Ok(Cached::Absent) => continue,
                Ok(Cached::Unknown) | Err(_) => break,
            }
        }

        warn!(host = %host, error = %err, "tenant store unavailable, failing closed");
        Err(GateError::TenantNotFound { host: host.to_string() })
    }

    fn admit(&self, tenant: Arc<TenantContext>, strategy: Strategy, stale: bool) -> GateResult<Resolution> {
        if !tenant.is_active() {
            return Err(GateError::TenantInactive {
                tenant_id: tenant.tenant_id.to_string(),
            });
        }
        if strategy == Strategy::Fallback {
            warn!(tenant_id = %tenant.tenant_id, "no tenant matched, serving fallback tenant");
        }
        Ok(Resolution { tenant, strategy, stale })
    }
}
