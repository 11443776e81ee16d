//! API Handlers

use crate::pipeline::Admission;
use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    Extension, Json,
};
use metrics_exporter_prometheus::PrometheusHandle;
use gate_tenant::{TenantId, TenantStatus, TenantTier};
use serde::Serialize;
use std::net::IpAddr;

use crate::middleware::GateState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub cache_entries: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// Health check
pub async fn health(State(state): State<GateState>) -> Json<HealthResponse> {
    let stats = state.gate.cache_stats();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        cache_entries: stats.entries,
        cache_hits: stats.hits,
        cache_misses: stats.misses,
    })
}

/// Resolved tenant as seen by downstream handlers
#[derive(Serialize)]
pub struct TenantResponse {
    pub tenant_id: TenantId,
    pub name: String,
    pub status: TenantStatus,
    pub tier: TenantTier,
    pub strategy: &'static str,
    pub route: &'static str,
    pub client_network: String,
    pub client_ip: IpAddr,
}

/// Echo the tenant the gate admitted the request under
pub async fn current_tenant(Extension(admission): Extension<Admission>) -> Json<TenantResponse> {
    let tenant = &admission.tenant;
    Json(TenantResponse {
        tenant_id: tenant.tenant_id,
        name: tenant.name.clone(),
        status: tenant.status,
        tier: tenant.tier,
        strategy: admission.strategy.as_str(),
        route: admission.route.as_str(),
        client_network: admission.client.network().to_string(),
        client_ip: admission.client.addr(),
    })
}

/// Prometheus scrape endpoint
pub async fn metrics(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        handle.render(),
    )
}
