//! Manager liveness endpoint.
//!
//! Returns 200 if both the registry database and the message bus are
//! reachable, 503 otherwise.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    registry: bool,
    bus: bool,
}

async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (registry, bus) = tokio::join!(state.registry_healthy(), state.bus_healthy());

    let (status, status_code) = if registry && bus {
        ("ok", StatusCode::OK)
    } else {
        ("unhealthy", StatusCode::SERVICE_UNAVAILABLE)
    };

    (
        status_code,
        Json(HealthResponse {
            status,
            registry,
            bus,
        }),
    )
}

pub fn router() -> Router<AppState> {
    Router::new().route("/plugins/health", get(health_check))
}
