//! Application error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use crate::dispatch::DispatchError;
use crate::models::plugin::RegistrationError;
use crate::registry::RegistryError;

/// HTTP-facing errors. Every variant renders as
/// `{"error": "<kind>", "cause": "<detail>"}`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("not found")]
    NotFound(String),

    /// Caller lacks the required role.
    #[error("{0}")]
    Forbidden(String),

    #[error("plugin not enabled")]
    NotEnabled(String),

    #[error("bad request")]
    BadRequest(String),

    #[error("plugin unavailable")]
    Upstream(String),

    #[error("plugin timed out")]
    UpstreamTimeout(String),

    #[error("registry error")]
    Registry(#[from] RegistryError),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Internal(_) | AppError::Registry(RegistryError::Database(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Registry(RegistryError::Backend(_)) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::NotFound(_) | AppError::Registry(RegistryError::PluginNotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            AppError::Forbidden(_) | AppError::NotEnabled(_) => StatusCode::FORBIDDEN,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Detail safe to show the caller. Database causes are logged instead.
    fn cause(&self) -> Option<String> {
        match self {
            AppError::Internal(e) => {
                tracing::error!(error = %e, "internal server error");
                None
            }
            AppError::Registry(RegistryError::PluginNotFound(id)) => {
                Some(format!("plugin {id} not found"))
            }
            AppError::Registry(e) => {
                tracing::error!(error = %e, "registry error");
                None
            }
            AppError::Forbidden(_) => None,
            AppError::NotFound(cause)
            | AppError::NotEnabled(cause)
            | AppError::BadRequest(cause)
            | AppError::Upstream(cause)
            | AppError::UpstreamTimeout(cause) => Some(cause.clone()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self.cause() {
            Some(cause) => json!({ "error": self.to_string(), "cause": cause }),
            None => json!({ "error": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

impl From<DispatchError> for AppError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::NotEnabled { .. } => AppError::NotEnabled(e.to_string()),
            DispatchError::PluginNotFound(_) | DispatchError::ActionNotFound { .. } => {
                AppError::NotFound(e.to_string())
            }
            DispatchError::InvalidTarget(_) | DispatchError::Upstream(_) => {
                AppError::Upstream(e.to_string())
            }
            DispatchError::Timeout(_) => AppError::UpstreamTimeout(e.to_string()),
            DispatchError::Registry(e) => AppError::Registry(e),
        }
    }
}

impl From<RegistrationError> for AppError {
    fn from(e: RegistrationError) -> Self {
        AppError::BadRequest(e.to_string())
    }
}

/// Result type alias using AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn dispatch_errors_map_to_statuses() {
        let id = Uuid::nil();
        let cases = [
            (
                DispatchError::NotEnabled {
                    plugin_id: id,
                    team_id: 8,
                },
                StatusCode::FORBIDDEN,
            ),
            (DispatchError::PluginNotFound(id), StatusCode::NOT_FOUND),
            (
                DispatchError::ActionNotFound {
                    plugin_id: id,
                    action: "x".into(),
                },
                StatusCode::NOT_FOUND,
            ),
            (DispatchError::Upstream("refused".into()), StatusCode::BAD_GATEWAY),
            (DispatchError::Timeout("30s".into()), StatusCode::GATEWAY_TIMEOUT),
        ];

        for (err, status) in cases {
            assert_eq!(AppError::from(err).status(), status);
        }
    }

    #[test]
    fn forbidden_message_is_the_error() {
        let err = AppError::Forbidden("Not a team".into());
        assert_eq!(err.to_string(), "Not a team");
        assert!(err.cause().is_none());
    }

    #[test]
    fn database_causes_are_not_echoed() {
        let err = AppError::Registry(RegistryError::Database(sqlx::Error::PoolTimedOut));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.cause().is_none());
    }

    #[test]
    fn registration_errors_are_bad_requests() {
        let err = AppError::from(RegistrationError::EmptyName);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.cause().as_deref(), Some("plugin name must not be empty"));
    }
}
