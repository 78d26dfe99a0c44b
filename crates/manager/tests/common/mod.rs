#![allow(clippy::unwrap_used, clippy::expect_used)]
#![allow(dead_code)]
//! Shared harness for manager integration tests.
//!
//! Builds the real router and services over the in-memory registry and bus
//! from `formloom-test-utils`, so no database or Redis is needed.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use http_body_util::BodyExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use formloom_manager::metrics::Metrics;
use formloom_manager::poller::PollerSettings;
use formloom_manager::routes::build_router;
use formloom_manager::state::{AppState, RuntimeSettings};
use formloom_test_utils::{MemoryRegistry, RecordingPublisher};

/// Test application wrapper using the real routes and state.
pub struct TestApp {
    router: Router,
    pub registry: Arc<MemoryRegistry>,
    pub publisher: Arc<RecordingPublisher>,
    pub state: AppState,
    pub shutdown: CancellationToken,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_settings(RuntimeSettings {
            proxy_timeout: Duration::from_secs(2),
            poller: PollerSettings {
                interval: Duration::from_secs(3600),
                timeout: Duration::from_millis(500),
                failure_threshold: 3,
            },
        })
    }

    pub fn with_settings(settings: RuntimeSettings) -> Self {
        let registry = Arc::new(MemoryRegistry::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let shutdown = CancellationToken::new();
        let state = AppState::new(
            registry.clone(),
            publisher.clone(),
            Arc::new(Metrics::new()),
            settings,
            shutdown.clone(),
        );
        let router = build_router(state.clone());

        Self {
            router,
            registry,
            publisher,
            state,
            shutdown,
        }
    }

    /// Send a request to the test application.
    pub async fn request(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request")
    }

    /// Send a request as a tenant (`X-Role: team`, `X-Id: team`) and decode
    /// the JSON reply.
    pub async fn as_team(
        &self,
        method: Method,
        uri: &str,
        team: i64,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-role", "team")
            .header("x-id", team.to_string());
        self.send(builder, body).await
    }

    /// Send a request without identity headers and decode the JSON reply.
    pub async fn anonymous(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        self.send(builder, body).await
    }

    pub async fn send(
        &self,
        builder: axum::http::request::Builder,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = self.request(request).await;
        let status = response.status();
        (status, body_json(response).await)
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Read a response body as JSON; non-JSON bodies come back as a string value.
pub async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()))
}
