//! Pipeline and axum layer scenarios

use axum::body::{to_bytes, Body};
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use gate_common::{ClientMetadata, Clock, GateError, IpAllowlist, ManualClock, Role};
use gate_gateway::{
    build_router, metrics_router, AuthOutcome, GateConfig, GateRequest, GateState, RequestGate, RouteClass,
};
use gate_limits::{MemoryLimitStore, Quota, RateLimitRule};
use metrics_exporter_prometheus::PrometheusBuilder;
use gate_tenant::{
    InMemoryTenantStore, SecurityPolicy, Strategy, TenantContext, TenantStatus, TenantStore,
    TenantTier, UsageLimits,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

struct Harness {
    gate: Arc<RequestGate>,
    tenants: Arc<InMemoryTenantStore>,
    clock: Arc<ManualClock>,
}

fn config() -> GateConfig {
    let mut config = GateConfig::default();
    config.tenancy.base_domain = Some("example.com".into());
    config.sweep_probability = 0.0;
    config
}

fn harness(config: GateConfig, tenants: Vec<TenantContext>) -> Harness {
    let store = Arc::new(InMemoryTenantStore::new());
    for tenant in tenants {
        store.upsert(tenant);
    }
    let clock = Arc::new(ManualClock::starting_now());
    let tenant_store: Arc<dyn TenantStore> = store.clone();
    let gate = Arc::new(RequestGate::new(
        &config,
        tenant_store,
        Arc::new(MemoryLimitStore::new()),
        clock.clone(),
    ));
    Harness {
        gate,
        tenants: store,
        clock,
    }
}

fn acme() -> TenantContext {
    TenantContext::new("Acme Directory", TenantTier::Pro)
        .with_subdomain("acme")
        .with_domain("directory.acme.com")
}

fn browser(ip: &str) -> ClientMetadata {
    ClientMetadata::new(ip.parse().unwrap())
        .with_user_agent("Mozilla/5.0 (X11; Linux x86_64)")
        .with_accept_language("en-US,en;q=0.9")
        .with_accept_encoding("gzip, br")
}

#[tokio::test]
async fn test_subdomain_request_is_admitted() {
    let tenant = acme();
    let h = harness(config(), vec![tenant.clone()]);

    let request = GateRequest::new("acme.example.com", "/api/listings", browser("203.0.113.7"));
    let admission = h.gate.admit(&request).await.unwrap();

    assert_eq!(admission.tenant.tenant_id, tenant.tenant_id);
    assert_eq!(admission.strategy, Strategy::Subdomain);
    assert_eq!(admission.route, RouteClass::Api);
    assert!(!admission.stale_tenant);
    assert!(matches!(admission.quota, Quota::Metered { limit: 100, remaining: 99, .. }));
    assert!(admission.attempts.is_none());
}

#[tokio::test]
async fn test_custom_domain_resolved_once_within_ttl() {
    let h = harness(config(), vec![acme()]);
    let request = GateRequest::new("Directory.Acme.com:443", "/api/listings", browser("203.0.113.7"));

    let first = h.gate.admit(&request).await.unwrap();
    let lookups = h.tenants.lookups();
    let second = h.gate.admit(&request).await.unwrap();

    assert_eq!(first.strategy, Strategy::CustomDomain);
    assert!(Arc::ptr_eq(&first.tenant, &second.tenant));
    assert_eq!(h.tenants.lookups(), lookups);
}

#[tokio::test]
async fn test_unknown_host_is_rejected() {
    let h = harness(config(), vec![acme()]);
    let request = GateRequest::new("nobody.example.com", "/api/listings", browser("203.0.113.7"));

    let err = h.gate.admit(&request).await.unwrap_err();
    assert!(matches!(err, GateError::TenantNotFound { .. }));
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn test_ip_allowlist() {
    let tenant = acme().with_security(SecurityPolicy {
        ip_allowlist: IpAllowlist::parse(["10.0.0.0/8"]).unwrap(),
        ..SecurityPolicy::default()
    });
    let h = harness(config(), vec![tenant]);

    let outside = GateRequest::new("acme.example.com", "/api/listings", browser("203.0.113.7"));
    match h.gate.admit(&outside).await {
        Err(GateError::IpNotAllowed { ip }) => assert_eq!(ip.to_string(), "203.0.113.7"),
        other => panic!("expected IpNotAllowed, got {:?}", other),
    }

    // IPv4-mapped IPv6 is checked as IPv4
    let mapped = GateRequest::new("acme.example.com", "/api/listings", browser("::ffff:10.1.2.3"));
    assert!(h.gate.admit(&mapped).await.is_ok());
}

#[tokio::test]
async fn test_admin_routes_require_admin_role() {
    let h = harness(config(), vec![acme()]);
    let base = GateRequest::new("acme.example.com", "/api/admin/tenants", browser("203.0.113.7"));

    let anonymous = h.gate.admit(&base).await.unwrap_err();
    assert!(matches!(anonymous, GateError::Forbidden(_)));

    let owner = h.gate.admit(&base.clone().with_role(Role::Owner)).await.unwrap_err();
    assert_eq!(owner.status_code(), 403);

    let admin = h.gate.admit(&base.with_role(Role::Admin)).await.unwrap();
    assert_eq!(admin.route, RouteClass::Admin);
}

#[tokio::test]
async fn test_login_route_rate_limited() {
    let h = harness(config(), vec![acme()]);
    let first_request = h.clock.now();
    let request = GateRequest::new("acme.example.com", "/api/auth/login", browser("203.0.113.7"));

    for _ in 0..5 {
        h.gate.admit(&request).await.unwrap();
        h.clock.advance(Duration::from_millis(100));
    }

    match h.gate.admit(&request).await {
        Err(GateError::RateLimitExceeded { limit, remaining, reset_at, .. }) => {
            assert_eq!(limit, 5);
            assert_eq!(remaining, 0);
            assert!(reset_at - first_request <= chrono::Duration::seconds(60));
        }
        other => panic!("expected RateLimitExceeded, got {:?}", other),
    }

    // other route classes keep their own buckets
    let api = GateRequest::new("acme.example.com", "/api/listings", browser("203.0.113.7"));
    assert!(h.gate.admit(&api).await.is_ok());
}

fn relaxed_auth() -> GateConfig {
    let mut config = config();
    config.rate_limits.auth = RateLimitRule::per_minute(1_000);
    config
}

#[tokio::test]
async fn test_failed_logins_lock_the_account() {
    let h = harness(relaxed_auth(), vec![acme()]);
    let account = "user@example.com";
    let request = GateRequest::new("acme.example.com", "/api/auth/login", browser("203.0.113.7"))
        .with_account(account);

    let admission = h.gate.admit(&request).await.unwrap();
    assert_eq!(admission.attempts.map(|a| a.remaining_attempts), Some(5));

    for n in 1..=4 {
        let outcome = h.gate.authenticate(&admission, account, || async { false }).await.unwrap();
        assert_eq!(outcome, AuthOutcome::Failed { failures: n, locked: false });
    }
    let outcome = h.gate.authenticate(&admission, account, || async { false }).await.unwrap();
    assert_eq!(outcome, AuthOutcome::Failed { failures: 5, locked: true });

    match h.gate.admit(&request).await {
        Err(GateError::BruteForceBlocked { blocked_until, retry_after }) => {
            assert!(blocked_until > h.clock.now());
            assert!(retry_after > Duration::ZERO);
        }
        other => panic!("expected BruteForceBlocked, got {:?}", other),
    }

    // the correct password does not help while locked
    let locked = h.gate.authenticate(&admission, account, || async { true }).await;
    assert!(matches!(locked, Err(GateError::BruteForceBlocked { .. })));

    h.clock.advance(Duration::from_secs(15 * 60));
    let admission = h.gate.admit(&request).await.unwrap();
    assert_eq!(admission.attempts.map(|a| a.failures), Some(0));
}

#[tokio::test]
async fn test_success_before_threshold_resets() {
    let h = harness(relaxed_auth(), vec![acme()]);
    let account = "user@example.com";
    let request = GateRequest::new("acme.example.com", "/api/auth/login", browser("203.0.113.7"))
        .with_account(account);
    let admission = h.gate.admit(&request).await.unwrap();

    for _ in 0..4 {
        h.gate.authenticate(&admission, account, || async { false }).await.unwrap();
    }
    let outcome = h.gate.authenticate(&admission, account, || async { true }).await.unwrap();
    assert_eq!(outcome, AuthOutcome::Succeeded);

    let admission = h.gate.admit(&request).await.unwrap();
    assert_eq!(admission.attempts.map(|a| a.failures), Some(0));
}

#[tokio::test]
async fn test_lockout_is_per_tenant() {
    let other = TenantContext::new("Other Directory", TenantTier::Basic).with_subdomain("other");
    let h = harness(relaxed_auth(), vec![acme(), other]);
    let account = "user@example.com";
    let client = browser("203.0.113.7");

    let at_acme = GateRequest::new("acme.example.com", "/api/auth/login", client.clone()).with_account(account);
    let admission = h.gate.admit(&at_acme).await.unwrap();
    for _ in 0..5 {
        h.gate.authenticate(&admission, account, || async { false }).await.unwrap();
    }
    assert!(h.gate.admit(&at_acme).await.is_err());

    let at_other = GateRequest::new("other.example.com", "/api/auth/login", client).with_account(account);
    assert!(h.gate.admit(&at_other).await.is_ok());
}

#[tokio::test]
async fn test_lockout_stays_with_the_failing_network() {
    let h = harness(relaxed_auth(), vec![acme()]);
    let account = "victim@example.com";

    let attacker = GateRequest::new("acme.example.com", "/api/auth/login", browser("203.0.113.66")).with_account(account);
    let admission = h.gate.admit(&attacker).await.unwrap();
    for _ in 0..5 {
        h.gate.authenticate(&admission, account, || async { false }).await.unwrap();
    }
    assert!(matches!(h.gate.admit(&attacker).await, Err(GateError::BruteForceBlocked { .. })));

    let owner = GateRequest::new("acme.example.com", "/api/auth/login", browser("198.51.100.23")).with_account(account);
    let admission = h.gate.admit(&owner).await.unwrap();
    assert_eq!(admission.attempts.map(|a| a.failures), Some(0));
}

#[tokio::test]
async fn test_password_reset_uses_stricter_policy() {
    let h = harness(relaxed_auth(), vec![acme()]);
    let account = "user@example.com";
    let request = GateRequest::new("acme.example.com", "/api/auth/password-reset", browser("203.0.113.7"))
        .with_account(account);
    let admission = h.gate.admit(&request).await.unwrap();
    assert_eq!(admission.route, RouteClass::PasswordReset);

    for _ in 0..2 {
        h.gate.authenticate(&admission, account, || async { false }).await.unwrap();
    }
    let outcome = h.gate.authenticate(&admission, account, || async { false }).await.unwrap();
    assert_eq!(outcome, AuthOutcome::Failed { failures: 3, locked: true });
}

#[tokio::test]
async fn test_authenticate_rejects_non_auth_routes() {
    let h = harness(config(), vec![acme()]);
    let request = GateRequest::new("acme.example.com", "/api/listings", browser("203.0.113.7"));
    let admission = h.gate.admit(&request).await.unwrap();

    let err = h.gate.authenticate(&admission, "user@example.com", || async { true }).await.unwrap_err();
    assert!(matches!(err, GateError::BadRequest(_)));
}

#[tokio::test]
async fn test_ai_limits_follow_tier_and_override() {
    let free = TenantContext::new("Free", TenantTier::Free).with_subdomain("free");
    let capped = TenantContext::new("Capped", TenantTier::Pro)
        .with_subdomain("capped")
        .with_limits(UsageLimits {
            ai_requests_per_day: Some(2),
            ..UsageLimits::default()
        });
    let enterprise = TenantContext::new("Big", TenantTier::Enterprise).with_subdomain("big");
    let h = harness(config(), vec![free, capped, enterprise]);
    let client = browser("203.0.113.7");

    let free_req = GateRequest::new("free.example.com", "/api/ai/describe", client.clone());
    let quota = h.gate.admit(&free_req).await.unwrap().quota;
    assert!(matches!(quota, Quota::Metered { limit: 5, remaining: 4, .. }));

    let capped_req = GateRequest::new("capped.example.com", "/api/ai/describe", client.clone());
    assert!(h.gate.admit(&capped_req).await.is_ok());
    assert!(h.gate.admit(&capped_req).await.is_ok());
    assert!(matches!(
        h.gate.admit(&capped_req).await,
        Err(GateError::RateLimitExceeded { limit: 2, .. })
    ));

    let big_req = GateRequest::new("big.example.com", "/api/ai/describe", client);
    for _ in 0..20 {
        assert_eq!(h.gate.admit(&big_req).await.unwrap().quota, Quota::Unmetered);
    }
}

#[tokio::test]
async fn test_ai_override_zero_or_malformed_is_not_widened() {
    let with_ai = |name: &str, label: &str, per_day: i64| {
        TenantContext::new(name, TenantTier::Pro)
            .with_subdomain(label)
            .with_limits(UsageLimits {
                ai_requests_per_day: Some(per_day),
                ..UsageLimits::default()
            })
    };
    let h = harness(
        config(),
        vec![with_ai("Off", "off", 0), with_ai("Broken", "broken", -5), with_ai("Open", "open", -1)],
    );
    let client = browser("203.0.113.7");

    for host in ["off.example.com", "broken.example.com"] {
        let request = GateRequest::new(host, "/api/ai/describe", client.clone());
        for _ in 0..3 {
            assert!(matches!(h.gate.admit(&request).await, Err(GateError::Forbidden(_))));
        }
        // other routes are unaffected
        let api = GateRequest::new(host, "/api/listings", client.clone());
        assert!(h.gate.admit(&api).await.is_ok());
    }

    let open = GateRequest::new("open.example.com", "/api/ai/describe", client);
    assert_eq!(h.gate.admit(&open).await.unwrap().quota, Quota::Unmetered);
}

#[tokio::test]
async fn test_deactivated_tenant_rejected_after_invalidation() {
    let tenant = acme();
    let h = harness(config(), vec![tenant.clone()]);
    let request = GateRequest::new("acme.example.com", "/api/listings", browser("203.0.113.7"));
    h.gate.admit(&request).await.unwrap();

    let suspended = tenant.with_status(TenantStatus::Suspended);
    h.tenants.upsert(suspended.clone());
    h.gate.resolver().invalidate_tenant(&suspended).unwrap();

    let err = h.gate.admit(&request).await.unwrap_err();
    assert!(matches!(err, GateError::TenantInactive { .. }));
}

#[tokio::test]
async fn test_tenant_store_outage_fails_closed() {
    let h = harness(config(), vec![acme()]);
    h.tenants.set_available(false);

    let request = GateRequest::new("acme.example.com", "/api/listings", browser("203.0.113.7"));
    let err = h.gate.admit(&request).await.unwrap_err();
    assert!(matches!(err, GateError::TenantNotFound { .. }));
}

// --- axum layer ---

fn router(h: &Harness, trust_forwarded_for: bool) -> axum::Router {
    build_router(GateState {
        gate: h.gate.clone(),
        trust_forwarded_for,
    })
}

fn http_request(host: &str, path: &str, peer: [u8; 4]) -> Request<Body> {
    let mut request = Request::builder()
        .uri(path)
        .header("host", host)
        .header("user-agent", "integration-test")
        .body(Body::empty())
        .unwrap();
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from((peer, 50_000))));
    request
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_http_admitted_request_sees_tenant() {
    let tenant = acme();
    let h = harness(config(), vec![tenant.clone()]);

    let response = router(&h, false)
        .oneshot(http_request("acme.example.com", "/api/tenant", [203, 0, 113, 7]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-ratelimit-limit"], "100");
    assert_eq!(response.headers()["x-ratelimit-remaining"], "99");
    assert!(response.headers().contains_key("x-ratelimit-reset"));

    let body = json_body(response).await;
    assert_eq!(body["tenant_id"], tenant.tenant_id.to_string());
    assert_eq!(body["name"], "Acme Directory");
    assert_eq!(body["strategy"], "subdomain");
    assert_eq!(body["client_network"], "203.0.113.7");
}

#[tokio::test]
async fn test_http_unknown_tenant_is_400() {
    let h = harness(config(), vec![acme()]);

    let response = router(&h, false)
        .oneshot(http_request("ghost.example.com", "/api/tenant", [203, 0, 113, 7]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], "tenant_not_found");
    assert_eq!(body["allowed"], false);
}

#[tokio::test]
async fn test_http_rate_limit_rejection_carries_backoff() {
    let mut config = config();
    config.rate_limits.api = RateLimitRule::per_minute(2);
    let h = harness(config, vec![acme()]);
    let app = router(&h, false);

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(http_request("acme.example.com", "/api/tenant", [203, 0, 113, 7]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .oneshot(http_request("acme.example.com", "/api/tenant", [203, 0, 113, 7]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));
    assert_eq!(response.headers()["x-ratelimit-remaining"], "0");

    let body = json_body(response).await;
    assert_eq!(body["error"], "rate_limit_exceeded");
    assert_eq!(body["allowed"], false);
    assert_eq!(body["limit"], 2);
    assert_eq!(body["remaining"], 0);
    assert!(body["resetTime"].is_string());
    assert!(body["retryAfter"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn test_http_forwarded_for_only_when_trusted() {
    let tenant = acme().with_security(SecurityPolicy {
        ip_allowlist: IpAllowlist::parse(["198.51.100.0/24"]).unwrap(),
        ..SecurityPolicy::default()
    });
    let h = harness(config(), vec![tenant]);

    let forwarded = || {
        let mut request = http_request("acme.example.com", "/api/tenant", [10, 0, 0, 1]);
        request
            .headers_mut()
            .insert("x-forwarded-for", "198.51.100.9".parse().unwrap());
        request
    };

    let untrusted = router(&h, false).oneshot(forwarded()).await.unwrap();
    assert_eq!(untrusted.status(), StatusCode::FORBIDDEN);

    let trusted = router(&h, true).oneshot(forwarded()).await.unwrap();
    assert_eq!(trusted.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_http_health_is_not_gated() {
    let h = harness(config(), vec![]);

    let request = Request::builder()
        .uri("/health")
        .header("host", "unknown.invalid")
        .body(Body::empty())
        .unwrap();
    let response = router(&h, false).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
}

#[test]
fn test_metrics_endpoint_renders_gate_counters() {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
    let h = harness(config(), vec![acme()]);

    metrics::with_local_recorder(&recorder, || {
        runtime.block_on(async {
            let admitted = GateRequest::new("acme.example.com", "/api/listings", browser("203.0.113.7"));
            h.gate.admit(&admitted).await.unwrap();
            let unknown = GateRequest::new("ghost.example.com", "/api/listings", browser("203.0.113.7"));
            assert!(h.gate.admit(&unknown).await.is_err());
        })
    });

    let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
    let response = runtime.block_on(metrics_router(handle).oneshot(request)).unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = runtime.block_on(to_bytes(response.into_body(), usize::MAX)).unwrap();
    let body = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(body.contains(r#"gate_admitted_total{route="api"} 1"#), "{}", body);
    assert!(body.contains(r#"gate_rejected_total{reason="tenant_not_found"} 1"#), "{}", body);
}
