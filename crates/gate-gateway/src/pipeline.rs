//! Request gate pipeline
//!
//! Fixed order per request:
//!
//! 1. resolve tenant
//! 2. tenant IP allowlist
//! 3. role requirement (admin routes)
//! 4. rate limit for the route class
//! 5. brute-force state (auth routes with a known account)
//!
//! The first failing stage short-circuits with its [`GateError`].

use crate::config::{GateConfig, RateLimitsConfig};
use crate::route::{RouteClass, RouteTable};
use gate_common::client::normalize_ip;
use gate_common::{ClientId, ClientMetadata, Clock, GateError, GateResult, Role};
use gate_limits::{
    AttemptStatus, BruteForceGuard, LimitStore, Quota, RateKey, RateLimitRule, RateLimiter, Sweeper,
};
use gate_tenant::{
    CacheStats, ContextCache, Strategy, TenantContext, TenantResolver, TenantStore,
};
use metrics::counter;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What the gate needs to know about one inbound request
#[derive(Debug, Clone)]
pub struct GateRequest {
    pub host: String,
    pub path: String,
    pub client: ClientMetadata,
    /// Account being authenticated, when already known
    pub account: Option<String>,
    /// Caller role established by the session layer
    pub role: Option<Role>,
}

impl GateRequest {
    pub fn new(host: &str, path: &str, client: ClientMetadata) -> Self {
        Self {
            host: host.to_string(),
            path: path.to_string(),
            client,
            account: None,
            role: None,
        }
    }

    pub fn with_account(mut self, account: &str) -> Self {
        self.account = Some(account.to_string());
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }
}

/// A request that passed every stage
#[derive(Debug, Clone)]
pub struct Admission {
    pub tenant: Arc<TenantContext>,
    pub strategy: Strategy,
    /// Tenant served from a stale cache entry
    pub stale_tenant: bool,
    pub route: RouteClass,
    pub client: ClientId,
    pub quota: Quota,
    /// Brute-force standing, on auth routes with a known account
    pub attempts: Option<AttemptStatus>,
}

/// Result of a guarded credential check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Succeeded,
    Failed {
        failures: u32,
        /// Set when this failure triggered the lockout
        locked: bool,
    },
}

/// Per-request gatekeeper
pub struct RequestGate {
    resolver: TenantResolver,
    cache: Arc<ContextCache<Arc<TenantContext>>>,
    limiter: RateLimiter,
    guard: BruteForceGuard,
    limit_store: Arc<dyn LimitStore>,
    routes: RouteTable,
    limits: RateLimitsConfig,
    sweeper: Sweeper,
    clock: Arc<dyn Clock>,
}

impl RequestGate {
    pub fn new(
        config: &GateConfig,
        tenant_store: Arc<dyn TenantStore>,
        limit_store: Arc<dyn LimitStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache = Arc::new(ContextCache::new(config.tenancy.cache_config(), clock.clone()));
        let resolver = TenantResolver::new(tenant_store, cache.clone(), config.tenancy.resolver_config());

        Self {
            resolver,
            cache,
            limiter: RateLimiter::new(limit_store.clone(), clock.clone()),
            guard: BruteForceGuard::new(limit_store.clone(), clock.clone(), config.brute_force),
            limit_store,
            routes: RouteTable::new(config.routes.clone()),
            limits: config.rate_limits.clone(),
            sweeper: Sweeper::new(config.sweep_probability),
            clock,
        }
    }

    /// Tenant resolver, for cache invalidation on configuration changes
    pub fn resolver(&self) -> &TenantResolver {
        &self.resolver
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Run the pipeline for one request
    #[tracing::instrument(name = "gate", skip_all, fields(host = %request.host, path = %request.path))]
    pub async fn admit(&self, request: &GateRequest) -> GateResult<Admission> {
        let result = self.run(request).await;

        match &result {
            Ok(admission) => {
                counter!("gate_admitted_total", "route" => admission.route.as_str()).increment(1);
            }
            Err(err) => {
                counter!("gate_rejected_total", "reason" => err.error_code()).increment(1);
                if err.is_operational() {
                    debug!(reason = err.error_code(), "request rejected");
                } else {
                    info!(reason = err.error_code(), error = %err, "request rejected by degraded dependency");
                }
            }
        }

        self.maybe_sweep().await;
        result
    }

    async fn run(&self, request: &GateRequest) -> GateResult<Admission> {
        let resolution = self.resolver.resolve(&request.host, &request.path).await?;
        let tenant = resolution.tenant;

        let client = ClientId::derive(&request.client);
        if !tenant.security.ip_allowlist.permits(client.addr()) {
            return Err(GateError::IpNotAllowed {
                ip: normalize_ip(client.addr()),
            });
        }

        let route = self.routes.classify(&request.path);
        if route == RouteClass::Admin {
            match request.role {
                Some(role) if role.satisfies(Role::Admin) => {}
                _ => return Err(GateError::Forbidden("admin role required".into())),
            }
        }

        let mut key = RateKey::new(route.as_str(), &client);
        if self.limits.tenant_aware || route == RouteClass::Ai {
            key = key.with_tenant(tenant.tenant_id);
        }
        let quota = self.limiter.check(&key, self.rule_for(route, &tenant)?).await?;

        let attempts = match (route.auth_flow(), request.account.as_deref()) {
            (Some(flow), Some(account)) => Some(
                self.guard
                    .check(flow, &client, &tenant_account(&tenant, account))
                    .await?,
            ),
            _ => None,
        };

        Ok(Admission {
            tenant,
            strategy: resolution.strategy,
            stale_tenant: resolution.stale,
            route,
            client,
            quota,
            attempts,
        })
    }

    /// Check lockout, run `verify`, then record the outcome
    pub async fn authenticate<F, Fut>(&self, admission: &Admission, account: &str, verify: F) -> GateResult<AuthOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = bool>,
    {
        let flow = admission
            .route
            .auth_flow()
            .ok_or_else(|| GateError::BadRequest("not an authentication route".into()))?;
        let account = tenant_account(&admission.tenant, account);

        self.guard.check(flow, &admission.client, &account).await?;

        if verify().await {
            self.guard.record_success(flow, &admission.client, &account).await?;
            Ok(AuthOutcome::Succeeded)
        } else {
            let outcome = self.guard.record_failure(flow, &admission.client, &account).await?;
            counter!("gate_auth_failures_total", "flow" => flow.as_str()).increment(1);
            Ok(AuthOutcome::Failed {
                failures: outcome.failures,
                locked: outcome.blocked_until.is_some(),
            })
        }
    }

    fn rule_for(&self, route: RouteClass, tenant: &TenantContext) -> GateResult<RateLimitRule> {
        let rule = match route {
            RouteClass::Login | RouteClass::PasswordReset => self.limits.auth,
            RouteClass::Api => self.limits.api,
            RouteClass::Admin => self.limits.admin,
            RouteClass::Ai => match tenant.limits.ai_requests_per_day {
                Some(0) => return Err(GateError::Forbidden("ai features are disabled for this tenant".into())),
                Some(per_day) => {
                    let rule = RateLimitRule::per_day(per_day);
                    if let Err(e) = rule.validate() {
                        warn!(tenant_id = %tenant.tenant_id, error = %e, "invalid ai quota override");
                        return Err(GateError::Forbidden("ai quota is misconfigured for this tenant".into()));
                    }
                    rule
                }
                None => self.limits.ai.for_tier(tenant.tier),
            },
        };
        Ok(rule)
    }

    async fn maybe_sweep(&self) {
        if let Some(removed) = self
            .sweeper
            .maybe_sweep(self.limit_store.as_ref(), self.clock.as_ref())
            .await
        {
            let evicted = self.cache.sweep();
            debug!(limit_entries = removed, cache_entries = evicted, "idle state swept");
        }
    }
}

/// Accounts are tenant-local
fn tenant_account(tenant: &TenantContext, account: &str) -> String {
    format!("{}:{}", tenant.tenant_id, account)
}
