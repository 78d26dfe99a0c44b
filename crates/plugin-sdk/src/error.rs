//! Plugin-side error type.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("invalid action: {0}")]
    UnknownAction(String),

    #[error("no handler for event: {0}")]
    UnknownEvent(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("action failed: {0}")]
    Failed(String),

    #[error("manager replied {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PluginError {
    fn status(&self) -> StatusCode {
        match self {
            PluginError::UnknownAction(_)
            | PluginError::UnknownEvent(_)
            | PluginError::InvalidInput(_)
            | PluginError::Json(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for PluginError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "plugin request failed");
        }
        (
            status,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_map_to_400() {
        assert_eq!(
            PluginError::UnknownAction("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            PluginError::InvalidInput("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn failures_map_to_500() {
        assert_eq!(
            PluginError::Failed("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
