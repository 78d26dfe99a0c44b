#![allow(clippy::unwrap_used, clippy::expect_used)]
//! HTTP surface tests: registration, tenant settings and the action proxy.

mod common;

use axum::http::{Method, StatusCode};
use formloom_plugin_sdk::contract::{PluginMetadata, plugin_id};
use formloom_test_utils::{assert, registration};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::TestApp;

fn demo(url: &str) -> PluginMetadata {
    PluginMetadata::new("demo", "Demo plugin", url)
        .with_actions(["ping"])
        .with_events(["sub"])
}

#[tokio::test]
async fn register_enable_and_proxy_per_tenant() {
    let app = TestApp::new();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/actions/ping"))
        .and(header("x-id", "7"))
        .and(header("x-role", "team"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": "Action ping executed",
            "result": "pong",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let id = plugin_id("demo");
    let (status, body) = app
        .anonymous(
            Method::POST,
            "/register",
            Some(serde_json::to_value(demo(&server.uri())).unwrap()),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["message"], "Plugin registered");
    assert_eq!(body["plugin"]["id"], id.to_string());

    let (status, body) = app
        .as_team(Method::GET, &format!("/plugins/{id}"), 7, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "demo");
    assert_eq!(body["actions"], json!(["ping"]));
    assert_eq!(body["events"], json!(["sub"]));

    let (status, body) = app
        .as_team(
            Method::POST,
            &format!("/plugins/{id}/status"),
            7,
            Some(json!({"enabled": true})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Plugin status updated");
    assert_eq!(body["plugin"]["enabled"], true);

    let (status, body) = app
        .as_team(Method::GET, &format!("/plugins/{id}/settings"), 7, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enabled"], true);
    assert_eq!(body["team_id"], 7);

    let (status, body) = app
        .as_team(
            Method::POST,
            &format!("/plugins/{id}/actions/ping"),
            7,
            Some(json!({})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "pong");

    let (status, body) = app
        .as_team(
            Method::POST,
            &format!("/plugins/{id}/actions/ping"),
            8,
            Some(json!({})),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert::error_is(&body, "plugin not enabled");
}

#[tokio::test]
async fn replayed_registration_returns_stored_record() {
    let app = TestApp::new();
    let reg = serde_json::to_value(demo("http://demo.internal")).unwrap();

    let (status, _) = app.anonymous(Method::POST, "/register", Some(reg.clone())).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app.anonymous(Method::POST, "/register", Some(reg)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Plugin already registered");
    assert_eq!(body["plugin"]["actions"], json!(["ping"]));

    let (_, plugins) = app.as_team(Method::GET, "/plugins", 1, None).await;
    assert_eq!(plugins.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn registration_is_validated() {
    let app = TestApp::new();

    let (status, body) = app
        .anonymous(
            Method::POST,
            "/register",
            Some(serde_json::to_value(demo("ftp://demo")).unwrap()),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert::error_is(&body, "bad request");

    let (status, _) = app
        .anonymous(Method::POST, "/register", Some(json!({"name": "no id"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn registration_starts_liveness_polling() {
    let app = TestApp::new();
    let reg = demo("http://demo.internal");

    app.anonymous(
        Method::POST,
        "/register",
        Some(serde_json::to_value(&reg).unwrap()),
    )
    .await;

    assert!(app.state.poller().is_watching(reg.id));
}

#[tokio::test]
async fn tenant_routes_require_team_role() {
    let app = TestApp::new();

    let (status, body) = app.anonymous(Method::GET, "/plugins", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert::error_is(&body, "Not a team");

    let builder = axum::http::Request::builder()
        .uri("/plugins")
        .header("x-role", "admin")
        .header("x-id", "7");
    let (status, _) = app.send(builder, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn tenant_id_must_be_numeric() {
    let app = TestApp::new();
    let plugin = app.registry.insert(&registration("demo", "http://demo"));

    let builder = axum::http::Request::builder()
        .uri(format!("/plugins/{}/settings", plugin.id))
        .header("x-role", "team")
        .header("x-id", "team-seven");
    let (status, body) = app.send(builder, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert::contains(&body["cause"].to_string(), "X-Id");
}

#[tokio::test]
async fn settings_are_created_disabled() {
    let app = TestApp::new();
    let plugin = app.registry.insert(&registration("demo", "http://demo"));

    let (status, body) = app
        .as_team(Method::GET, &format!("/plugins/{}/settings", plugin.id), 3, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enabled"], false);
    assert_eq!(app.registry.setting(plugin.id, 3), Some(false));

    let (status, body) = app
        .as_team(Method::GET, &format!("/plugins/{}/settings", plugin.id), 3, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enabled"], false);
}

#[tokio::test]
async fn unknown_plugin_lookups() {
    let app = TestApp::new();
    let missing = plugin_id("missing");

    let (status, _) = app
        .as_team(Method::GET, &format!("/plugins/{missing}"), 1, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .as_team(Method::GET, &format!("/plugins/{missing}/settings"), 1, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.as_team(Method::GET, "/plugins/not-a-uuid", 1, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn status_requires_boolean_body() {
    let app = TestApp::new();
    let plugin = app.registry.insert(&registration("demo", "http://demo"));

    let (status, _) = app
        .as_team(
            Method::POST,
            &format!("/plugins/{}/status", plugin.id),
            1,
            Some(json!({"enabled": "yes"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.registry.setting(plugin.id, 1), None);
}

#[tokio::test]
async fn configure_is_gated_by_enablement() {
    let app = TestApp::new();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/configure"))
        .and(query_param("dry_run", "1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"message": "Plugin configured"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let plugin = app.registry.insert(&registration("demo", &server.uri()));
    app.registry.enable(plugin.id, 7);

    let uri = format!("/plugins/{}/configure?dry_run=1", plugin.id);
    let (status, _) = app
        .as_team(Method::POST, &uri, 8, Some(json!({"sheet": "abc"})))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .as_team(Method::POST, &uri, 7, Some(json!({"sheet": "abc"})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Plugin configured");
}

#[tokio::test]
async fn undeclared_action_is_not_proxied() {
    let app = TestApp::new();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let plugin = app
        .registry
        .insert(&registration("demo", &server.uri()).with_actions(["ping"]));
    app.registry.enable(plugin.id, 7);

    let (status, body) = app
        .as_team(
            Method::POST,
            &format!("/plugins/{}/actions/export", plugin.id),
            7,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert::contains(&body["cause"].to_string(), "export");
}

#[tokio::test]
async fn plugin_status_codes_pass_through() {
    let app = TestApp::new();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/actions/ping"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({"error": "bad input"})))
        .mount(&server)
        .await;

    let plugin = app
        .registry
        .insert(&registration("demo", &server.uri()).with_actions(["ping"]));
    app.registry.enable(plugin.id, 7);

    let (status, body) = app
        .as_team(
            Method::POST,
            &format!("/plugins/{}/actions/ping", plugin.id),
            7,
            Some(json!({})),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "bad input");
}

#[tokio::test]
async fn unreachable_plugin_is_bad_gateway() {
    let app = TestApp::new();
    let plugin = app
        .registry
        .insert(&registration("demo", "http://127.0.0.1:1").with_actions(["ping"]));
    app.registry.enable(plugin.id, 7);

    let (status, body) = app
        .as_team(
            Method::POST,
            &format!("/plugins/{}/actions/ping", plugin.id),
            7,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert::error_is(&body, "plugin unavailable");
}

#[tokio::test]
async fn health_reflects_dependencies() {
    let app = TestApp::new();

    let (status, body) = app.anonymous(Method::GET, "/plugins/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    app.registry.set_unavailable(true);
    let (status, body) = app.anonymous(Method::GET, "/plugins/health", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["registry"], false);
    assert_eq!(body["bus"], true);
}

#[tokio::test]
async fn registry_outage_is_service_unavailable() {
    let app = TestApp::new();
    app.registry.set_unavailable(true);

    let (status, body) = app.as_team(Method::GET, "/plugins", 1, None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert::error_is(&body, "registry error");
}

#[tokio::test]
async fn metrics_are_exposed() {
    let app = TestApp::new();
    app.as_team(Method::GET, "/plugins", 1, None).await;

    let response = app
        .request(
            axum::http::Request::get("/metrics")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = common::body_json(response).await;
    assert::contains(body.as_str().unwrap(), "http_requests_total");
}
