#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tokio::sync::Semaphore;
use tower::ServiceExt;
use urlpdf_api::config::ServerConfig;
use urlpdf_api::router::build_app_router;
use urlpdf_api::state::AppState;
use urlpdf_core::convert::ConvertRequest;
use urlpdf_core::signature::{compute_signature, SIGNATURE_HEADER};
use urlpdf_pipeline::{JobRunner, JobStore, RenderError, Scheduler};

pub const TEST_SECRET: &str = "test-secret";

/// Bytes written by [`StubRunner`] for every successful job.
pub const STUB_PDF: &[u8] = b"%PDF-1.4 stub";

/// Build a test `ServerConfig` writing into `output_dir`.
pub fn test_config(output_dir: &Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        worker_secret: TEST_SECRET.to_string(),
        chrome_path: None,
        output_dir: output_dir.to_path_buf(),
        job_retention_secs: 1000,
        max_concurrent_jobs: 4,
        page_settle_ms: 0,
        reaper_interval_secs: 30,
        watermark_text: String::new(),
    }
}

/// Stands in for the browser pipeline.
///
/// Writes [`STUB_PDF`] to the output path, or fails when the URL contains
/// `fail`. With a gate, each run first waits for a permit.
pub struct StubRunner {
    gate: Option<Arc<Semaphore>>,
}

impl StubRunner {
    pub fn new() -> Self {
        Self { gate: None }
    }

    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self { gate: Some(gate) }
    }
}

#[async_trait]
impl JobRunner for StubRunner {
    async fn run(&self, request: &ConvertRequest, output: &Path) -> Result<(), RenderError> {
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.unwrap();
        }
        if request.url.contains("fail") {
            return Err(RenderError::EmptyOutput);
        }
        tokio::fs::write(output, STUB_PDF).await?;
        Ok(())
    }
}

/// Build the full application router around `runner`, using the same
/// middleware stack as production.
pub fn build_test_app_with(output_dir: &Path, runner: StubRunner) -> (Router, AppState) {
    let config = test_config(output_dir);
    let jobs = Arc::new(JobStore::new(output_dir, config.job_retention()));
    let scheduler = Scheduler::new(jobs, Arc::new(runner), config.max_concurrent_jobs);

    let config = Arc::new(config);
    let state = AppState::new(Arc::clone(&config), scheduler);
    (build_app_router(state.clone(), &config), state)
}

pub fn build_test_app(output_dir: &Path) -> (Router, AppState) {
    build_test_app_with(output_dir, StubRunner::new())
}

/// Send a GET request.
pub async fn get(app: Router, path: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(path)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// POST `body` to `path` with an optional `x-signature` header.
pub async fn post_signed(
    app: Router,
    path: &str,
    body: &str,
    signature: Option<&str>,
) -> Response<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(path)
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header(SIGNATURE_HEADER, signature);
    }
    let request = builder.body(Body::from(body.to_string())).unwrap();
    app.oneshot(request).await.unwrap()
}

/// POST `body` to `/apiv1/convert`, signed with the test secret.
pub async fn submit(app: Router, body: &str) -> Response<Body> {
    let signature = compute_signature(TEST_SECRET, body.as_bytes());
    post_signed(app, "/apiv1/convert", body, Some(&signature)).await
}

/// Submit a request and return the job id from the response.
pub async fn submit_ok(app: Router, body: &str) -> String {
    let response = submit(app, body).await;
    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let json = body_json(response).await;
    json["id"].as_str().unwrap().to_string()
}

/// Poll `/apiv1/status/{id}` until the job is finished.
pub async fn wait_finished(app: Router, id: &str) -> serde_json::Value {
    for _ in 0..500 {
        let json = body_json(get(app.clone(), &format!("/apiv1/status/{id}")).await).await;
        if json["status"] == "finished" {
            return json;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} did not finish");
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
