use super::state::ServerState;

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::IntoResponse,
};
use tracing::debug;

/// The caller of a user route. Identity is established upstream; this
/// service only trusts the forwarded user id.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: String,
}

/// Marker for a request carrying the configured admin token.
#[derive(Debug, Clone, Copy)]
pub struct AdminSession;

pub const HEADER_USER_ID_KEY: &str = "X-User-Id";
pub const HEADER_ADMIN_TOKEN_KEY: &str = "X-Admin-Token";

pub enum SessionExtractionError {
    AccessDenied,
}

impl IntoResponse for SessionExtractionError {
    fn into_response(self) -> axum::response::Response {
        match self {
            SessionExtractionError::AccessDenied => StatusCode::FORBIDDEN.into_response(),
        }
    }
}

fn extract_header(parts: &Parts, key: &str) -> Option<String> {
    parts
        .headers
        .get(key)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).trim().to_string())
        .filter(|v| !v.is_empty())
}

impl FromRequestParts<ServerState> for Session {
    type Rejection = SessionExtractionError;

    async fn from_request_parts(
        parts: &mut Parts,
        _ctx: &ServerState,
    ) -> Result<Self, Self::Rejection> {
        match extract_header(parts, HEADER_USER_ID_KEY) {
            Some(user_id) => Ok(Session { user_id }),
            None => {
                debug!("No {} header on request", HEADER_USER_ID_KEY);
                Err(SessionExtractionError::AccessDenied)
            }
        }
    }
}

impl FromRequestParts<ServerState> for AdminSession {
    type Rejection = SessionExtractionError;

    async fn from_request_parts(
        parts: &mut Parts,
        ctx: &ServerState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = ctx.config.admin_token.as_deref() else {
            debug!("Admin request rejected, no admin token configured");
            return Err(SessionExtractionError::AccessDenied);
        };
        match extract_header(parts, HEADER_ADMIN_TOKEN_KEY) {
            Some(token) if token == expected => Ok(AdminSession),
            _ => {
                debug!("Admin request rejected, missing or wrong token");
                Err(SessionExtractionError::AccessDenied)
            }
        }
    }
}
