//! Tenant identity carried by the API gateway.
//!
//! The gateway authenticates callers and forwards `X-Id` (team id) and
//! `X-Role`. Tenant routes require `X-Role: team`.

use axum::body::Body;
use axum::extract::FromRequestParts;
use axum::http::Request;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::AppError;
use crate::models::TeamId;
use crate::models::setting::team_id_from_wire;

pub const X_ID: &str = "x-id";
pub const X_ROLE: &str = "x-role";

/// Role value granted to tenants.
pub const TEAM_ROLE: &str = "team";

/// Reject callers whose `X-Role` is missing or not `team`.
pub async fn require_team_role(request: Request<Body>, next: Next) -> Response {
    let role = request
        .headers()
        .get(X_ROLE)
        .and_then(|v| v.to_str().ok());

    if role != Some(TEAM_ROLE) {
        tracing::debug!(role = ?role, "rejecting non-team caller");
        return AppError::Forbidden("Not a team".to_string()).into_response();
    }

    next.run(request).await
}

/// Calling tenant, parsed from `X-Id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Team(pub TeamId);

impl<S: Send + Sync> FromRequestParts<S> for Team {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(X_ID)
            .ok_or_else(|| AppError::BadRequest("missing X-Id header".to_string()))?
            .to_str()
            .map_err(|_| AppError::BadRequest("X-Id header is not valid text".to_string()))?;

        raw.trim()
            .parse::<u64>()
            .ok()
            .and_then(team_id_from_wire)
            .map(Team)
            .ok_or_else(|| AppError::BadRequest(format!("invalid X-Id header: {raw:?}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    async fn extract(value: Option<&str>) -> Result<Team, AppError> {
        let mut builder = Request::builder().uri("/plugins");
        if let Some(v) = value {
            builder = builder.header(X_ID, v);
        }
        let (mut parts, ()) = builder.body(()).unwrap().into_parts();
        Team::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn parses_numeric_team_id() {
        assert_eq!(extract(Some("7")).await.unwrap(), Team(7));
    }

    #[tokio::test]
    async fn rejects_missing_negative_and_oversized_ids() {
        assert!(matches!(extract(None).await, Err(AppError::BadRequest(_))));
        assert!(matches!(extract(Some("-1")).await, Err(AppError::BadRequest(_))));
        assert!(matches!(extract(Some("abc")).await, Err(AppError::BadRequest(_))));
        assert!(matches!(
            extract(Some("18446744073709551615")).await,
            Err(AppError::BadRequest(_))
        ));
    }
}
