//! HTTP route handlers.

pub mod health;
pub mod metrics;
pub mod plugins;
pub mod register;

use axum::{Router, middleware};
use tower_http::trace::TraceLayer;

use crate::middleware::track_requests;
use crate::state::AppState;

/// Assemble the manager's HTTP surface.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(metrics::router())
        .merge(register::router())
        .merge(plugins::router())
        .layer(middleware::from_fn_with_state(state.clone(), track_requests))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
