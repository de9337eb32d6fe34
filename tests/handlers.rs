//! Handler-level tests using tower::ServiceExt::oneshot.
//!
//! Tests the full Axum router (middleware + handlers) without binding a TCP
//! listener. Only paths that never reach an origin are exercised here; the
//! upstream-facing flows live in `tests/relay.rs`.

use axum::{
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use hls_relay::config::{Config, QueryInheritance};
use hls_relay::server::build_router;
use http_body_util::BodyExt;
use std::time::Duration;
use tower::ServiceExt;

/// Build a test config with sensible defaults.
fn test_config() -> Config {
    Config {
        port: 0,
        is_dev: true,
        manifest_timeout: Duration::from_secs(10),
        segment_timeout: Duration::from_secs(60),
        max_manifest_bytes: 2 * 1024 * 1024,
        media_max_bytes: 1024 * 1024,
        max_redirects: 10,
        query_inheritance: QueryInheritance::All,
        block_private_targets: false,
    }
}

async fn body_text(resp: axum::response::Response) -> String {
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(body.to_vec()).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

// ── Health endpoint ─────────────────────────────────────────────────────────

#[tokio::test]
async fn health_returns_200_with_json() {
    let app = build_router(test_config()).await;

    let resp = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    assert!(json["uptime_seconds"].is_number());
}

#[tokio::test]
async fn root_is_health_alias() {
    let app = build_router(test_config()).await;

    let resp = app.oneshot(get("/")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body_text(resp).await.contains("\"status\":\"ok\""));
}

// ── Version header ──────────────────────────────────────────────────────────

#[tokio::test]
async fn all_responses_include_version_header() {
    for uri in ["/health", "/hls", "/does-not-exist"] {
        let app = build_router(test_config()).await;
        let resp = app.oneshot(get(uri)).await.unwrap();

        let version = resp
            .headers()
            .get("x-relay-version")
            .unwrap_or_else(|| panic!("missing X-Relay-Version header on {uri}"));
        assert_eq!(version.to_str().unwrap(), env!("CARGO_PKG_VERSION"));
    }
}

// ── 404 for unknown routes ──────────────────────────────────────────────────

#[tokio::test]
async fn unknown_route_returns_404() {
    let app = build_router(test_config()).await;

    let resp = app.oneshot(get("/playlist.m3u8")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// ── Target validation ───────────────────────────────────────────────────────

#[tokio::test]
async fn hls_without_url_is_400() {
    let app = build_router(test_config()).await;

    let resp = app.oneshot(get("/hls")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_text(resp).await, "No URL provided\n");
}

#[tokio::test]
async fn hls_with_empty_url_is_400() {
    let app = build_router(test_config()).await;

    let resp = app.oneshot(get("/hls?url=")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn hls_with_relative_url_is_400() {
    let app = build_router(test_config()).await;

    let resp = app.oneshot(get("/hls?url=segment.ts")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(resp).await.starts_with("Invalid target URL"));
}

#[tokio::test]
async fn hls_with_non_http_scheme_is_400() {
    let app = build_router(test_config()).await;

    let resp = app
        .oneshot(get("/hls?url=file%3A%2F%2F%2Fetc%2Fpasswd"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn private_target_blocked_when_enabled() {
    let config = Config {
        block_private_targets: true,
        ..test_config()
    };
    let app = build_router(config).await;

    let resp = app
        .oneshot(get("/hls?url=http%3A%2F%2F169.254.169.254%2Flatest%2Fmeta-data%2F"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn media_without_url_is_400() {
    let app = build_router(test_config()).await;

    let resp = app.oneshot(get("/media")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// ── Metrics ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn metrics_endpoint_renders_prometheus_text() {
    let app = build_router(test_config()).await;

    // Produce at least one series
    let _ = app.clone().oneshot(get("/hls")).await.unwrap();

    let resp = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let content_type = resp.headers().get(header::CONTENT_TYPE).unwrap();
    assert!(content_type.to_str().unwrap().starts_with("text/plain"));
    assert!(body_text(resp).await.contains("relay_requests_total"));
}

// ── CORS ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn cors_preflight_allows_range_requests() {
    let app = build_router(test_config()).await;

    let req = Request::builder()
        .method(Method::OPTIONS)
        .uri("/hls?url=https%3A%2F%2Fcdn.example.com%2Fseg.ts")
        .header(header::ORIGIN, "https://player.example.com")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
        .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "range")
        .body(Body::empty())
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert!(resp.status().is_success());
    assert_eq!(
        resp.headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .unwrap(),
        "*"
    );
    let allowed = resp
        .headers()
        .get(header::ACCESS_CONTROL_ALLOW_HEADERS)
        .unwrap()
        .to_str()
        .unwrap()
        .to_ascii_lowercase();
    assert!(allowed.contains("range"));
}

#[tokio::test]
async fn simple_request_exposes_range_headers() {
    let app = build_router(test_config()).await;

    let req = Request::builder()
        .uri("/health")
        .header(header::ORIGIN, "https://player.example.com")
        .body(Body::empty())
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    let exposed = resp
        .headers()
        .get(header::ACCESS_CONTROL_EXPOSE_HEADERS)
        .unwrap()
        .to_str()
        .unwrap()
        .to_ascii_lowercase();
    assert!(exposed.contains("content-range"));
    assert!(exposed.contains("accept-ranges"));
}
