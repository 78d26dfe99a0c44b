//! Tenant-facing plugin routes.
//!
//! Every route requires `X-Role: team`; the tenant is taken from `X-Id`.

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, Method};
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::dispatch::{ProxyRequest, ProxyResponse};
use crate::error::{AppError, AppResult};
use crate::middleware::{Team, require_team_role};
use crate::models::{Plugin, PluginSetting};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct StatusRequest {
    enabled: bool,
}

fn parse_plugin_id(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| AppError::BadRequest(format!("invalid plugin id: {raw:?}")))
}

/// GET /plugins
async fn list_plugins(State(state): State<AppState>) -> AppResult<Json<Vec<Plugin>>> {
    Ok(Json(state.registry().list_plugins().await?))
}

/// GET /plugins/{id}
async fn get_plugin(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Plugin>> {
    let id = parse_plugin_id(&id)?;
    state
        .registry()
        .get_plugin(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("plugin {id} not found")))
}

/// GET /plugins/{id}/settings
///
/// Creates a disabled setting on first access.
async fn get_settings(
    State(state): State<AppState>,
    Team(team_id): Team,
    Path(id): Path<String>,
) -> AppResult<Json<PluginSetting>> {
    let id = parse_plugin_id(&id)?;
    let setting = state.registry().get_or_create_setting(id, team_id).await?;
    Ok(Json(setting))
}

/// POST /plugins/{id}/status
async fn set_status(
    State(state): State<AppState>,
    Team(team_id): Team,
    Path(id): Path<String>,
    body: Result<Json<StatusRequest>, JsonRejection>,
) -> AppResult<Json<Value>> {
    let id = parse_plugin_id(&id)?;
    let Json(request) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let setting = state
        .registry()
        .set_enabled(id, team_id, request.enabled)
        .await?;

    Ok(Json(json!({
        "message": "Plugin status updated",
        "plugin": setting,
    })))
}

/// POST /plugins/{id}/configure
async fn configure(
    State(state): State<AppState>,
    Team(team_id): Team,
    Path(id): Path<String>,
    method: Method,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> AppResult<ProxyResponse> {
    let id = parse_plugin_id(&id)?;
    let req = ProxyRequest::new(method, headers, query, body);
    Ok(state.dispatcher().dispatch_configure(id, team_id, req).await?)
}

/// POST /plugins/{id}/actions/{action}
async fn action(
    State(state): State<AppState>,
    Team(team_id): Team,
    Path((id, action)): Path<(String, String)>,
    method: Method,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> AppResult<ProxyResponse> {
    let id = parse_plugin_id(&id)?;
    let req = ProxyRequest::new(method, headers, query, body);
    Ok(state
        .dispatcher()
        .dispatch_action(id, team_id, &action, req)
        .await?)
}

/// Create the tenant plugin router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/plugins", get(list_plugins))
        .route("/plugins/{id}", get(get_plugin))
        .route("/plugins/{id}/settings", get(get_settings))
        .route("/plugins/{id}/status", post(set_status))
        .route("/plugins/{id}/configure", post(configure))
        .route("/plugins/{id}/actions/{action}", post(action))
        .route_layer(middleware::from_fn(require_team_role))
}
