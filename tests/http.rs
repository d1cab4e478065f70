//! HTTP boundary tests through `tower::ServiceExt::oneshot`.

mod common;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::{add_license, clock, config, seeded_store};
use http_body_util::BodyExt;
use licensegate::config::RateLimitConfig;
use licensegate::protocol::models::RecordStatus;
use licensegate::store::memory::NewPackage;
use licensegate::{DeploymentMode, MemoryStore};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn app(store: &Arc<MemoryStore>, mode: DeploymentMode) -> Router {
    licensegate::http::app(Arc::clone(store), &config(mode), clock()).unwrap()
}

async fn post(app: &Router, path: &str, body: Value) -> (StatusCode, Value) {
    send(app, path, body.to_string(), None, None).await
}

async fn send(
    app: &Router,
    path: &str,
    body: String,
    peer: Option<&str>,
    forwarded_for: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json");
    if let Some(ip) = forwarded_for {
        builder = builder.header("x-forwarded-for", ip);
    }
    let mut request = builder.body(Body::from(body)).unwrap();
    if let Some(peer) = peer {
        let addr: SocketAddr = peer.parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
    }
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn registration(key: &str, fingerprint: &str) -> Value {
    json!({ "license_key": key, "hostname": "build-01", "fingerprint": fingerprint })
}

#[tokio::test]
async fn register_machine_status_codes() {
    let store = seeded_store();
    add_license(&store, "ABC123", Some(2), None, RecordStatus::Active);
    let app = app(&store, DeploymentMode::HostnameMove);

    let (status, body) = post(&app, "/api/register-machine", registration("ABC123", "F1")).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Machine registered successfully");
    assert_eq!(body["data"]["hostname"], "build-01");
    assert!(body["data"]["client_id"].is_u64());
    let machine_id = body["data"]["machine_id"].as_str().unwrap().to_string();
    assert_eq!(machine_id.len(), 10);

    let (status, body) = post(&app, "/api/register-machine", registration("ABC123", "F1")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
    assert_eq!(body["machine_id"], machine_id);

    post(&app, "/api/register-machine", registration("ABC123", "F2")).await;
    let (status, body) = post(&app, "/api/register-machine", registration("ABC123", "F3")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "License has reached maximum machine count");

    let (status, _) = post(&app, "/api/register-machine", registration("NOPE", "F1")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn moved_machine_returns_ok() {
    let store = seeded_store();
    add_license(&store, "OLD", None, None, RecordStatus::Active);
    add_license(&store, "NEW", None, None, RecordStatus::Active);
    let app = app(&store, DeploymentMode::HostnameMove);

    post(&app, "/api/register-machine", registration("OLD", "F1")).await;
    let (status, body) = post(&app, "/api/register-machine", registration("NEW", "F1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["moved"], true);
}

#[tokio::test]
async fn validation_failures_are_422() {
    let store = seeded_store();
    let app = app(&store, DeploymentMode::HostnameMove);

    let (status, body) = post(&app, "/api/register-machine", json!({ "license_key": "ABC123" })).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["message"], "Validation failed");
    assert!(body["errors"]["fingerprint"].is_array());
    assert!(body["errors"]["hostname"].is_array());

    let (status, body) = send(&app, "/api/validate-license", "{ not json".into(), None, None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["body"].is_array());
}

#[tokio::test]
async fn check_machine_responses() {
    let store = seeded_store();
    add_license(&store, "ABC123", Some(2), None, RecordStatus::Active);
    let app = app(&store, DeploymentMode::HostnameMove);
    post(&app, "/api/register-machine", registration("ABC123", "F1")).await;

    let (status, body) = post(
        &app,
        "/api/check-machine",
        json!({ "license_key": "ABC123", "fingerprint": "F1" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["exists"], true);
    assert_eq!(body["data"]["status"], "active");

    let (status, body) = post(
        &app,
        "/api/check-machine",
        json!({ "license_key": "ABC123", "fingerprint": "F9" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["exists"], false);
}

#[tokio::test]
async fn validate_license_snapshot() {
    let store = seeded_store();
    let mut meta = BTreeMap::new();
    meta.insert("seats".to_string(), "team".to_string());
    let package = store
        .insert_package(NewPackage {
            name: "Studio".into(),
            description: Some("Desktop suite".into()),
            meta,
            ..Default::default()
        })
        .unwrap();
    store
        .insert_license(licensegate::store::memory::NewLicense {
            license_key: "ABC123".into(),
            license_type: licensegate::protocol::models::LicenseType::ConcurrentUsers,
            max_count: Some(3),
            expiration_date: Some(common::date(2024, 12, 31)),
            status: RecordStatus::Active,
            renewal_terms: Some("Yearly".into()),
            package: Some(package.id),
        })
        .unwrap();
    let app = app(&store, DeploymentMode::HostnameMove);

    let (status, body) = post(&app, "/api/validate-license", json!({ "license_key": "ABC123" })).await;
    assert_eq!(status, StatusCode::OK);
    let data = &body["data"];
    assert_eq!(data["license_type"], "concurrent-users");
    assert_eq!(data["is_expired"], true);
    assert_eq!(data["is_active"], false);
    assert_eq!(data["expiration_date"], "2024-12-31");
    assert_eq!(data["current_count"], 0);
    assert_eq!(data["package"]["name"], "Studio");
    assert_eq!(data["package"]["meta"]["seats"], "team");

    let (status, _) = post(&app, "/api/validate-license", json!({ "license_key": "NOPE" })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn email_mode_reports_client_email() {
    let store = seeded_store();
    add_license(&store, "ABC123", Some(2), None, RecordStatus::Active);
    add_license(&store, "OTHER", Some(2), None, RecordStatus::Active);
    let app = app(&store, DeploymentMode::EmailReject);

    let mut request = registration("ABC123", "F1");
    request["email"] = json!("ops@acme.test");
    let (status, body) = post(&app, "/api/register-machine", request.clone()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["client_email"], "ops@acme.test");

    request["license_key"] = json!("OTHER");
    let (status, body) = post(&app, "/api/register-machine", request).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["machine_id"].is_string());

    let (status, body) = post(
        &app,
        "/api/check-machine",
        json!({ "license_key": "ABC123", "fingerprint": "F1", "email": "nobody@acme.test" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["exists"], false);
}

fn throttled_app(store: &Arc<MemoryStore>, trusted_proxies: &[&str]) -> Router {
    let mut config = config(DeploymentMode::HostnameMove);
    config.rate_limit = RateLimitConfig {
        max_requests: 2,
        window: Duration::from_secs(60),
        trusted_proxies: trusted_proxies.iter().map(|p| p.parse().unwrap()).collect(),
    };
    licensegate::http::app(Arc::clone(store), &config, clock()).unwrap()
}

#[tokio::test]
async fn throttle_applies_per_caller() {
    let store = seeded_store();
    let app = throttled_app(&store, &[]);
    let body = json!({ "license_key": "NOPE" }).to_string();

    for _ in 0..2 {
        let (status, _) =
            send(&app, "/api/validate-license", body.clone(), Some("203.0.113.5:4000"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
    let (status, body_json) =
        send(&app, "/api/validate-license", body.clone(), Some("203.0.113.5:4001"), None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body_json["message"], "Too Many Attempts.");

    let (status, _) =
        send(&app, "/api/validate-license", body, Some("198.51.100.7:4000"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn rotating_forwarded_header_does_not_escape_throttle() {
    let store = seeded_store();
    let app = throttled_app(&store, &[]);
    let body = json!({ "license_key": "NOPE" }).to_string();

    let mut allowed = 0;
    for i in 0..50 {
        let spoofed = format!("198.51.100.{}", i);
        let (status, _) = send(
            &app,
            "/api/validate-license",
            body.clone(),
            Some("192.0.2.9:5000"),
            Some(&spoofed),
        )
        .await;
        if status != StatusCode::TOO_MANY_REQUESTS {
            allowed += 1;
        }
    }
    assert_eq!(allowed, 2);
}

#[tokio::test]
async fn trusted_proxy_forwards_caller_identity() {
    let store = seeded_store();
    let app = throttled_app(&store, &["10.0.0.2"]);
    let body = json!({ "license_key": "NOPE" }).to_string();
    let proxy = Some("10.0.0.2:443");

    for _ in 0..2 {
        let (status, _) =
            send(&app, "/api/validate-license", body.clone(), proxy, Some("203.0.113.5")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
    let (status, _) =
        send(&app, "/api/validate-license", body.clone(), proxy, Some("203.0.113.5")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    // a second client behind the same proxy has its own budget
    let (status, _) = send(&app, "/api/validate-license", body, proxy, Some("203.0.113.6")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_is_not_throttled() {
    let store = seeded_store();
    let mut config = config(DeploymentMode::HostnameMove);
    config.rate_limit.max_requests = 1;
    let app = licensegate::http::app(Arc::clone(&store), &config, clock()).unwrap();

    for _ in 0..3 {
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
