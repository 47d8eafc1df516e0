#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use caselog_api::config::ServerConfig;
use caselog_api::router::build_app_router;
use caselog_api::state::AppState;
use caselog_core::archiver::{Archiver, ArchiverConfig};
use caselog_core::caselog::ConflictPolicy;
use caselog_core::memory::InMemoryCaseLogStore;
use caselog_core::retry::RetryPolicy;
use http_body_util::BodyExt;
use tower::ServiceExt;

/// Build a test `ServerConfig` with safe defaults.
///
/// Uses `http://localhost:5173` as CORS origin (matching the dev default)
/// and a 30-second request timeout.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..ServerConfig::default()
    }
}

/// Archiver settings for tests: short retry delay so retry paths stay fast.
pub fn test_archiver_config(policy: ConflictPolicy) -> ArchiverConfig {
    ArchiverConfig {
        policy,
        retry: RetryPolicy::new(3, Duration::from_millis(5)),
        storage_timeout: Duration::from_secs(5),
        instrumentation: true,
    }
}

/// Build the full application router over `store`, with the production
/// middleware stack.
pub fn build_test_app(store: InMemoryCaseLogStore) -> Router {
    build_test_app_with(store, test_archiver_config(ConflictPolicy::Skip))
}

pub fn build_test_app_with(store: InMemoryCaseLogStore, archiver: ArchiverConfig) -> Router {
    let config = test_config();
    let state = AppState {
        archiver: Arc::new(Archiver::new(Arc::new(store), archiver)),
    };
    build_app_router(state, &config)
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    post_raw(app, uri, "application/json", body.to_string()).await
}

pub async fn post_raw(
    app: Router,
    uri: &str,
    content_type: &str,
    body: impl Into<String>,
) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", content_type)
        .body(Body::from(body.into()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
