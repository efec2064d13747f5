//! Sign-up, login, logout and token handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use tally_core::auth::session::{
    ChangePasswordRequest, LoginRequest, LogoutRequest, RefreshRequest, SignUpRequest,
    ValidateAccessTokenRequest, ValidateRefreshTokenRequest,
};
use tracing::debug;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthenticatedUser;
use crate::models::{
    AccessTokenResponse, ChangePasswordBody, CredentialsBody, LogoutAllResponse,
    RefreshTokenBody, SignUpResponse, SuccessResponse, TokenKind, TokenOwnerResponse,
    TokenPairResponse, ValidateBody,
};

const TOKEN_TYPE: &str = "Bearer";

/// `POST /auth/signup`: register a user id with a password.
pub async fn signup_handler(
    State(state): State<AppState>,
    Json(body): Json<CredentialsBody>,
) -> AppResult<(StatusCode, Json<SignUpResponse>)> {
    if body.user_id.trim().is_empty() {
        return Err(AppError::Validation("userId must not be empty".into()));
    }
    if body.password.is_empty() {
        return Err(AppError::Validation("password must not be empty".into()));
    }

    let ct = state.shutdown.child_token();
    state
        .service
        .sign_up(
            &ct,
            SignUpRequest {
                user_id: body.user_id.clone(),
                password: body.password,
            },
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(SignUpResponse {
            user_id: body.user_id,
        }),
    ))
}

/// `POST /auth/login`: exchange credentials for an access/refresh pair.
pub async fn login_handler(
    State(state): State<AppState>,
    Json(body): Json<CredentialsBody>,
) -> AppResult<Json<TokenPairResponse>> {
    let ct = state.shutdown.child_token();
    let reply = state
        .service
        .login(
            &ct,
            LoginRequest {
                user_id: body.user_id,
                password: body.password,
            },
        )
        .await?;
    Ok(Json(TokenPairResponse {
        token_type: TOKEN_TYPE.into(),
        access_token: reply.access_token.into(),
        refresh_token: reply.refresh_token.into(),
    }))
}

/// `POST /auth/logout`: revoke one refresh token.
pub async fn logout_handler(
    State(state): State<AppState>,
    Json(body): Json<RefreshTokenBody>,
) -> AppResult<Json<SuccessResponse>> {
    let ct = state.shutdown.child_token();
    state
        .service
        .logout(
            &ct,
            LogoutRequest {
                refresh_token: body.refresh_token,
            },
        )
        .await?;
    Ok(Json(SuccessResponse { success: true }))
}

/// `POST /auth/refresh`: mint a new access token. The refresh token is
/// not rotated.
pub async fn refresh_handler(
    State(state): State<AppState>,
    Json(body): Json<RefreshTokenBody>,
) -> AppResult<Json<AccessTokenResponse>> {
    let ct = state.shutdown.child_token();
    let reply = state
        .service
        .refresh(
            &ct,
            RefreshRequest {
                refresh_token: body.refresh_token,
            },
        )
        .await?;
    Ok(Json(AccessTokenResponse {
        token_type: TOKEN_TYPE.into(),
        access_token: reply.access_token.into(),
    }))
}

/// `POST /auth/validate`: report the owner and expiry of a token.
pub async fn validate_handler(
    State(state): State<AppState>,
    Json(body): Json<ValidateBody>,
) -> AppResult<Json<TokenOwnerResponse>> {
    debug!(kind = ?body.kind, "validating token");
    let owner = match body.kind {
        TokenKind::Access => {
            let reply = state
                .service
                .validate_access_token(ValidateAccessTokenRequest { token: body.token })?;
            TokenOwnerResponse {
                user_id: reply.user_id,
                expires_at: reply.expires_at,
            }
        }
        TokenKind::Refresh => {
            let ct = state.shutdown.child_token();
            let reply = state
                .service
                .validate_refresh_token(&ct, ValidateRefreshTokenRequest { token: body.token })
                .await?;
            TokenOwnerResponse {
                user_id: reply.user_id,
                expires_at: reply.expires_at,
            }
        }
    };
    Ok(Json(owner))
}

/// `GET /auth/me`: identity behind the presented access token.
pub async fn me_handler(Extension(user): Extension<AuthenticatedUser>) -> Json<TokenOwnerResponse> {
    Json(TokenOwnerResponse {
        user_id: user.user_id,
        expires_at: user.expires_at,
    })
}

/// `POST /auth/logout-all`: revoke every refresh token of the caller.
pub async fn logout_all_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> AppResult<Json<LogoutAllResponse>> {
    let ct = state.shutdown.child_token();
    let revoked = state.service.logout_all(&ct, &user.user_id).await?;
    Ok(Json(LogoutAllResponse { revoked }))
}

/// `PUT /auth/password`: replace the caller's password.
pub async fn change_password_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<ChangePasswordBody>,
) -> AppResult<StatusCode> {
    if body.new_password.is_empty() {
        return Err(AppError::Validation("newPassword must not be empty".into()));
    }
    let ct = state.shutdown.child_token();
    state
        .service
        .change_password(
            &ct,
            ChangePasswordRequest {
                user_id: user.user_id,
                old_password: body.old_password,
                new_password: body.new_password,
            },
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
