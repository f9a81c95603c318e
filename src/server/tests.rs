// src/server/tests.rs

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use serde_json::{Value, json};
use tower::ServiceExt;

use super::{AppState, create_router};
use crate::config::Config;
use crate::core::models::ProbeKind;
use crate::core::scanner::testing::{StaticBackend, sample_data, stub_registry};

fn app_with(config: &Config) -> (Router, Arc<std::sync::atomic::AtomicUsize>) {
    let mut registry = stub_registry();
    let headers = StaticBackend::new(sample_data(ProbeKind::HttpHeaders));
    let calls = headers.calls.clone();
    registry.register(Arc::new(headers));
    (create_router(AppState::new(config, registry)), calls)
}

fn app() -> Router {
    app_with(&Config::default()).0
}

fn peer(ip: &str) -> ConnectInfo<SocketAddr> {
    ConnectInfo(SocketAddr::new(ip.parse().unwrap(), 40_000))
}

/// A GET arriving from `ip`, as `into_make_service_with_connect_info` sees it.
fn get(uri: &str, ip: &str) -> Request<Body> {
    Request::builder().uri(uri).extension(peer(ip)).body(Body::empty()).unwrap()
}

fn get_forwarded(uri: &str, ip: &str, forwarded_for: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-forwarded-for", forwarded_for)
        .extension(peer(ip))
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .extension(peer("198.51.100.7"))
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_is_ok() {
    let response = app().oneshot(get("/health", "192.0.2.1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "status": "ok" }));
}

#[tokio::test]
async fn dotless_domain_gets_default_suffix() {
    let response = app().oneshot(get("/check_domain/example", "192.0.2.1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CACHE_CONTROL], "public, max-age=3600");
    let etag = response.headers()[header::ETAG].to_str().unwrap().to_string();

    let body = json_body(response).await;
    assert_eq!(body["domain"], "example.pt");
    assert_eq!(body["score"], 4);
    assert_eq!(etag, format!("\"{}\"", body["fingerprint"].as_str().unwrap()));
    let kinds = body["probe_results"].as_object().unwrap();
    assert_eq!(kinds.len(), 6);
    assert!(!kinds.contains_key("port_scan"));
}

#[tokio::test]
async fn malformed_domain_is_rejected() {
    let response = app().oneshot(get("/check_domain/--bad..", "192.0.2.1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert!(body["error"].as_str().unwrap().contains("--bad.."));
}

#[tokio::test]
async fn eleventh_request_is_rate_limited() {
    let app = app();
    for _ in 0..10 {
        let response = app.clone().oneshot(get("/check_domain/example", "203.0.113.9")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app.clone().oneshot(get("/check_domain/example", "203.0.113.9")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
    assert_eq!(json_body(response).await, json!({ "error": "rate limit exceeded" }));

    let other = app.oneshot(get("/check_domain/example", "203.0.113.10")).await.unwrap();
    assert_eq!(other.status(), StatusCode::OK);
}

#[tokio::test]
async fn rotating_forwarded_for_does_not_reset_the_budget() {
    let app = app();
    for i in 0..10 {
        let request = get_forwarded("/check_domain/example", "203.0.113.9", &format!("10.9.9.{i}"));
        assert_eq!(app.clone().oneshot(request).await.unwrap().status(), StatusCode::OK);
    }

    let request = get_forwarded("/check_domain/example", "203.0.113.9", "10.9.9.200");
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn trusted_proxy_keys_clients_by_forwarded_for() {
    let mut config = Config::default();
    config.server.trust_forwarded_for = true;
    let (app, _) = app_with(&config);

    for _ in 0..10 {
        let request = get_forwarded("/check_domain/example", "10.0.0.1", "203.0.113.50, 10.0.0.1");
        assert_eq!(app.clone().oneshot(request).await.unwrap().status(), StatusCode::OK);
    }
    let same_client = get_forwarded("/check_domain/example", "10.0.0.1", "203.0.113.50");
    assert_eq!(app.clone().oneshot(same_client).await.unwrap().status(), StatusCode::TOO_MANY_REQUESTS);

    let other_client = get_forwarded("/check_domain/example", "10.0.0.1", "203.0.113.51");
    assert_eq!(app.oneshot(other_client).await.unwrap().status(), StatusCode::OK);
}

#[tokio::test(start_paused = true)]
async fn repeated_requests_are_served_from_cache() {
    let (app, calls) = app_with(&Config::default());

    let first = app.clone().oneshot(get("/check_domain/example", "192.0.2.1")).await.unwrap();
    assert!(!first.headers().contains_key(header::AGE));
    let first_etag = first.headers()[header::ETAG].clone();

    tokio::time::advance(std::time::Duration::from_secs(30)).await;
    let second = app.oneshot(get("/check_domain/EXAMPLE.pt.", "192.0.2.1")).await.unwrap();
    assert_eq!(second.headers()[header::AGE], "30");
    assert_eq!(second.headers()[header::ETAG], first_etag);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn matching_etag_yields_not_modified() {
    let app = app();
    let first = app.clone().oneshot(get("/check_domain/example", "192.0.2.1")).await.unwrap();
    let etag = first.headers()[header::ETAG].clone();

    let request = Request::builder()
        .uri("/check_domain/example")
        .header(header::IF_NONE_MATCH, etag.clone())
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(response.headers()[header::ETAG], etag);
}

#[tokio::test]
async fn batch_preserves_input_order_and_isolates_failures() {
    let body = json!({ "domains": ["example", "--bad..", "example.com"] });
    let response = app().oneshot(post_json("/check_domains", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let items = json_body(response).await;
    let items = items.as_array().unwrap();
    assert_eq!(items.len(), 3);
    assert_eq!(items[0]["domain"], "example.pt");
    assert_eq!(items[1]["domain"], "--bad..");
    assert!(items[1]["error"].is_string());
    assert_eq!(items[2]["domain"], "example.com");
    assert!(items[2]["fingerprint"].is_string());
}

#[tokio::test]
async fn oversized_or_malformed_batch_is_rejected() {
    let mut config = Config::default();
    config.server.max_batch_size = 2;
    let (app, _) = app_with(&config);

    let too_many = json!({ "domains": ["a.pt", "b.pt", "c.pt"] });
    let response = app.clone().oneshot(post_json("/check_domains", too_many)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let malformed = json!({ "hosts": ["a.pt"] });
    let response = app.oneshot(post_json("/check_domains", malformed)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(json_body(response).await["error"].is_string());
}
