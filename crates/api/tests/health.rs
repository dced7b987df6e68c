//! Integration tests for the health check endpoint and general HTTP behaviour.

mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use common::{body_json, build_test_app, build_test_app_with, get, submit_ok, StubRunner};
use tokio::sync::Semaphore;

// ---------------------------------------------------------------------------
// Test: GET /health returns 200 with expected JSON fields
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_check_returns_ok_with_json() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = build_test_app(dir.path());
    let response = get(app, "/health").await;

    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert_eq!(json["jobs"]["waiting"], 0);
    assert_eq!(json["jobs"]["working"], 0);
    assert_eq!(json["jobs"]["finished"], 0);
}

// ---------------------------------------------------------------------------
// Test: job counts reflect a running job
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_check_counts_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let (app, _) = build_test_app_with(dir.path(), StubRunner::gated(Arc::clone(&gate)));

    submit_ok(app.clone(), r#"{"url":"https://example.com"}"#).await;

    let json = body_json(get(app.clone(), "/health").await).await;
    assert_eq!(json["jobs"]["working"], 1);

    gate.add_permits(1);
}

// ---------------------------------------------------------------------------
// Test: Unknown route returns 404
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_route_returns_404() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = build_test_app(dir.path());
    let response = get(app, "/this-route-does-not-exist").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Test: job routes are only mounted under /apiv1
// ---------------------------------------------------------------------------

#[tokio::test]
async fn job_routes_require_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = build_test_app(dir.path());
    let response = get(app, "/status/ABC").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Test: x-request-id header is present in response
// ---------------------------------------------------------------------------

#[tokio::test]
async fn response_contains_x_request_id_header() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = build_test_app(dir.path());
    let response = get(app, "/health").await;

    assert_eq!(response.status(), StatusCode::OK);

    let request_id = response.headers().get("x-request-id");
    assert!(
        request_id.is_some(),
        "Response must contain an x-request-id header"
    );

    // The value should be a valid UUID (36 chars with hyphens).
    let id_str = request_id.unwrap().to_str().unwrap();
    assert_eq!(id_str.len(), 36, "x-request-id should be a UUID: {id_str}");
}
