//! Per-user configuration blob handlers.

use axum::extract::State;
use axum::{Extension, Json};
use tally_core::auth::session::UpdateConfigRequest;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthenticatedUser;
use crate::models::ConfigBody;

/// `GET /auth/config`: the caller's stored config, `null` when never set.
pub async fn get_config_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> AppResult<Json<ConfigBody>> {
    let ct = state.shutdown.child_token();
    let config = state.service.get_config(&ct, &user.user_id).await?;
    Ok(Json(ConfigBody { config }))
}

/// `PUT /auth/config`: replace the caller's config.
pub async fn update_config_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<ConfigBody>,
) -> AppResult<Json<ConfigBody>> {
    let config = body
        .config
        .ok_or_else(|| AppError::Validation("config must not be null".into()))?;
    let ct = state.shutdown.child_token();
    state
        .service
        .update_config(
            &ct,
            UpdateConfigRequest {
                user_id: user.user_id,
                config: config.clone(),
            },
        )
        .await?;
    Ok(Json(ConfigBody {
        config: Some(config),
    }))
}
