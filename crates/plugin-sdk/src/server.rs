//! HTTP surface every plugin exposes to the manager.
//!
//! - `GET /health` returns the plugin's metadata
//! - `POST /configure` accepts an opaque JSON document
//! - `POST /actions/{action}` runs a declared action and replies
//!   `{message, result}`

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use tokio_util::sync::CancellationToken;

use crate::config::PluginConfig;
use crate::contract::{ActionReply, PluginMetadata};
use crate::error::PluginError;
use crate::plugin::Plugin;
use crate::registration::RegistrationClient;
use crate::subscriber;

/// Build the plugin-side router.
pub fn router<P: Plugin>(plugin: Arc<P>) -> Router {
    Router::new()
        .route("/health", get(health::<P>))
        .route("/configure", post(configure::<P>))
        .route("/actions/{action}", post(action::<P>))
        .with_state(plugin)
}

async fn health<P: Plugin>(State(plugin): State<Arc<P>>) -> Json<PluginMetadata> {
    Json(plugin.metadata())
}

async fn configure<P: Plugin>(
    State(plugin): State<Arc<P>>,
    body: Option<Json<Value>>,
) -> Result<Json<Value>, PluginError> {
    let config = body.map(|Json(v)| v).unwrap_or(Value::Null);
    plugin.configure(config).await?;
    Ok(Json(json!({ "message": "Plugin configured" })))
}

async fn action<P: Plugin>(
    State(plugin): State<Arc<P>>,
    Path(action): Path<String>,
    body: Option<Json<Value>>,
) -> Response {
    if !plugin.actions().contains(&action) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Invalid action",
                "actions": plugin.actions().names(),
            })),
        )
            .into_response();
    }

    let input = body.map(|Json(v)| v).unwrap_or(Value::Null);
    match plugin.execute(&action, input).await {
        Ok(result) => Json(ActionReply {
            message: format!("Action {action} executed"),
            result,
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

/// Host a plugin until ctrl-c or SIGTERM.
///
/// Initializes the plugin, starts its HTTP surface, registers it with the
/// manager and, when a bus is configured, consumes its private event stream.
pub async fn serve<P: Plugin>(plugin: Arc<P>, config: PluginConfig) -> Result<(), PluginError> {
    plugin.initialize().await?;

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(plugin = %plugin.info().name, %addr, "plugin listening");

    let shutdown = CancellationToken::new();

    let registrar = RegistrationClient::new(&config.manager_url);
    let metadata = plugin.metadata();
    let attempts = config.registration_attempts;
    let backoff = config.registration_backoff;
    tokio::spawn(async move {
        if let Err(e) = registrar
            .register_with_retry(&metadata, attempts, backoff)
            .await
        {
            tracing::error!(error = %e, "giving up on registration");
        }
    });

    let consumer = config.redis_url.clone().map(|redis_url| {
        let plugin = plugin.clone();
        let token = shutdown.clone();
        let consumer_name = format!("{}-{}", plugin.info().name, config.port);
        tokio::spawn(async move {
            if let Err(e) = subscriber::run(plugin, &redis_url, &consumer_name, token).await {
                tracing::error!(error = %e, "event consumer failed");
            }
        })
    });

    let token = shutdown.clone();
    axum::serve(listener, router(plugin.clone()))
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            token.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Some(handle) = consumer {
        let _ = handle.await;
    }

    plugin.close().await?;
    tracing::info!(plugin = %plugin.info().name, "plugin stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
