//! Gate Gateway
//!
//! Request gatekeeping for multi-tenant HTTP services:
//! - Tenant resolution (custom domain, subdomain, path prefix)
//! - Per-tenant IP allowlists and role-gated routes
//! - Token-bucket rate limiting per route class
//! - Brute-force lockout on authentication routes
//!
//! [`RequestGate`] is framework independent; [`middleware::gate_layer`]
//! mounts it in an axum router.

#![warn(clippy::all)]

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod pipeline;
pub mod route;
pub mod telemetry;

pub use config::{ConfigError, GateConfig, RateLimitsConfig, SeedTenant, TenancyConfig};
pub use middleware::{AuthAccount, GateRejection, GateState};
pub use pipeline::{Admission, AuthOutcome, GateRequest, RequestGate};
pub use route::{RouteClass, RouteRule, RouteTable};

use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use gate_common::SystemClock;
use gate_limits::{LimitStore, MemoryLimitStore};
use gate_tenant::InMemoryTenantStore;
use std::net::SocketAddr;
use std::sync::Arc;

/// Build the API router.
///
/// `/health` is served ungated; every other route passes the gate first.
pub fn build_router(state: GateState) -> Router {
    let gated = Router::new()
        .route("/api/tenant", get(handlers::current_tenant))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::gate_layer,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(gated)
        .layer(axum::middleware::from_fn(middleware::logging))
        .with_state(state)
}

/// `/metrics` in Prometheus text format, rendered from `handle`
pub fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(handlers::metrics))
        .with_state(handle)
}

/// Start the gateway server
pub async fn serve(config: GateConfig) -> anyhow::Result<()> {
    let tenants = Arc::new(InMemoryTenantStore::new());
    for seed in config.seed_tenants.iter().cloned() {
        let tenant = seed.into_context();
        tracing::info!(tenant_id = %tenant.tenant_id, name = %tenant.name, "seeded tenant");
        tenants.upsert(tenant);
    }

    let metrics = telemetry::install_metrics()?;
    let limits = limit_store(&config).await?;
    let gate = Arc::new(RequestGate::new(&config, tenants, limits, Arc::new(SystemClock)));
    let app = build_router(GateState {
        gate,
        trust_forwarded_for: config.trust_forwarded_for,
    })
    .merge(metrics_router(metrics));

    tracing::info!("Gate Gateway listening on {}", config.listen);

    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}

#[cfg(feature = "redis")]
async fn limit_store(config: &GateConfig) -> anyhow::Result<Arc<dyn LimitStore>> {
    match &config.redis_url {
        Some(url) => {
            let store = gate_limits::RedisLimitStore::connect(url).await?;
            tracing::info!("using shared redis limit store");
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(MemoryLimitStore::new())),
    }
}

#[cfg(not(feature = "redis"))]
async fn limit_store(config: &GateConfig) -> anyhow::Result<Arc<dyn LimitStore>> {
    if config.redis_url.is_some() {
        tracing::warn!("redis_url is set but the redis feature is disabled, limits are per process");
    }
    Ok(Arc::new(MemoryLimitStore::new()))
}
