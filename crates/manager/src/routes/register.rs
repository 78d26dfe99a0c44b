//! Plugin self-registration.
//!
//! Unauthenticated; only reachable from the internal network.

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};

use crate::error::{AppError, AppResult};
use crate::models::PluginRegistration;
use crate::models::plugin::validate_registration;
use crate::state::AppState;

/// POST /register
///
/// Replaying a registration returns the stored record with 200; a new
/// registration returns 201. Either way the plugin is polled afterwards.
async fn register(
    State(state): State<AppState>,
    body: Result<Json<PluginRegistration>, JsonRejection>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let Json(registration) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let registration = validate_registration(registration)?;

    let outcome = state.registry().register(&registration).await?;

    let (status, message) = if outcome.is_created() {
        (StatusCode::CREATED, "Plugin registered")
    } else {
        tracing::debug!(plugin_id = %outcome.plugin().id, "plugin already registered");
        (StatusCode::OK, "Plugin already registered")
    };
    state.poller().watch(outcome.plugin());

    Ok((
        status,
        Json(json!({
            "message": message,
            "plugin": outcome.plugin(),
        })),
    ))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/register", post(register))
}
