//! Access Gate: Bearer token extraction and access token validation.

use axum::http::header::AUTHORIZATION;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use tally_core::auth::session::ValidateAccessTokenRequest;

use crate::AppState;
use crate::error::AppError;

/// Identity proven by the access token, stored in request extensions.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Axum middleware: extracts `Authorization: Bearer <token>`, validates the
/// access token, and injects `AuthenticatedUser` into request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing authorization header".into()))?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Unauthorized("Invalid authorization scheme".into()))?;

    let reply = state.service.validate_access_token(ValidateAccessTokenRequest {
        token: token.to_string(),
    })?;

    request.extensions_mut().insert(AuthenticatedUser {
        user_id: reply.user_id,
        expires_at: reply.expires_at,
    });

    Ok(next.run(request).await)
}
