//! axum middleware: the request gate layer, rejection rendering and access logging

use crate::pipeline::{GateRequest, RequestGate};
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, header::AsHeaderName, HeaderMap, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use gate_common::{ClientMetadata, GateError, Role};
use gate_limits::Quota;
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";
const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Shared state for [`gate_layer`]
#[derive(Clone)]
pub struct GateState {
    pub gate: Arc<RequestGate>,
    /// Honor `X-Forwarded-For`; only safe behind a proxy that overwrites it
    pub trust_forwarded_for: bool,
}

/// Account under authentication, set by an upstream extractor on auth routes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthAccount(pub String);

/// Gate middleware.
///
/// Reads the caller's `Role` and [`AuthAccount`] from request extensions when
/// present. On admission the [`crate::pipeline::Admission`] is inserted as an
/// extension for handlers and quota headers are added to the response.
pub async fn gate_layer(
    State(state): State<GateState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, GateRejection> {
    let gate_request = gate_request(&request, state.trust_forwarded_for)?;
    let admission = state.gate.admit(&gate_request).await?;
    let quota = admission.quota;

    request.extensions_mut().insert(admission);
    let mut response = next.run(request).await;

    if let Quota::Metered { limit, remaining, reset_at } = quota {
        quota_headers(response.headers_mut(), limit, remaining, reset_at);
    }
    Ok(response)
}

fn gate_request(request: &Request<Body>, trust_forwarded_for: bool) -> Result<GateRequest, GateError> {
    let headers = request.headers();

    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| request.uri().host())
        .ok_or_else(|| GateError::BadRequest("missing host".into()))?;

    let addr = client_addr(request, trust_forwarded_for)
        .ok_or_else(|| GateError::BadRequest("client address unavailable".into()))?;

    let mut client = ClientMetadata::new(addr);
    if let Some(ua) = header_str(headers, header::USER_AGENT) {
        client = client.with_user_agent(ua);
    }
    if let Some(lang) = header_str(headers, header::ACCEPT_LANGUAGE) {
        client = client.with_accept_language(lang);
    }
    if let Some(enc) = header_str(headers, header::ACCEPT_ENCODING) {
        client = client.with_accept_encoding(enc);
    }

    let mut gate_request = GateRequest::new(host, request.uri().path(), client);
    if let Some(role) = request.extensions().get::<Role>() {
        gate_request = gate_request.with_role(*role);
    }
    if let Some(AuthAccount(account)) = request.extensions().get::<AuthAccount>() {
        gate_request = gate_request.with_account(account);
    }
    Ok(gate_request)
}

fn client_addr(request: &Request<Body>, trust_forwarded_for: bool) -> Option<IpAddr> {
    if trust_forwarded_for {
        let forwarded = header_str(request.headers(), X_FORWARDED_FOR)
            .and_then(|v| v.split(',').next())
            .and_then(|first| first.trim().parse::<IpAddr>().ok());
        if forwarded.is_some() {
            return forwarded;
        }
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

fn header_str<K: AsHeaderName>(headers: &HeaderMap, name: K) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn quota_headers(headers: &mut HeaderMap, limit: u32, remaining: u32, reset_at: DateTime<Utc>) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(reset_at.timestamp()));
}

/// Whole seconds, rounded up, at least 1
fn retry_after_secs(d: Duration) -> u64 {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    secs.max(1)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RejectionBody {
    error: &'static str,
    message: String,
    allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    remaining: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reset_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    blocked_until: Option<DateTime<Utc>>,
    /// Seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

/// [`GateError`] rendered as an HTTP response
#[derive(Debug)]
pub struct GateRejection(pub GateError);

impl From<GateError> for GateRejection {
    fn from(err: GateError) -> Self {
        Self(err)
    }
}

impl IntoResponse for GateRejection {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let retry_after = err.retry_after().map(retry_after_secs);

        let mut body = RejectionBody {
            error: err.error_code(),
            message: err.to_string(),
            allowed: false,
            limit: None,
            remaining: None,
            reset_time: None,
            blocked_until: None,
            retry_after,
        };
        match &err {
            GateError::RateLimitExceeded { limit, remaining, reset_at, .. } => {
                body.limit = Some(*limit);
                body.remaining = Some(*remaining);
                body.reset_time = Some(*reset_at);
            }
            GateError::BruteForceBlocked { blocked_until, .. } => {
                body.blocked_until = Some(*blocked_until);
            }
            _ => {}
        }

        let mut response = (status, Json(body)).into_response();
        let headers = response.headers_mut();
        if let GateError::RateLimitExceeded { limit, remaining, reset_at, .. } = &err {
            quota_headers(headers, *limit, *remaining, *reset_at);
        }
        if let Some(secs) = retry_after {
            headers.insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// Logging middleware
pub async fn logging(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();

    let response = next.run(request).await;

    tracing::info!(
        method = %method,
        uri = %uri,
        status = %response.status(),
        latency_us = start.elapsed().as_micros() as u64,
        "request complete"
    );

    response
}
