//! # tally_api
//!
//! HTTP API library for Tally.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use tally_core::auth::SessionService;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::handlers::{auth, config as config_handlers};

pub const POST_AUTH_SIGNUP: &str = "/auth/signup";
pub const POST_AUTH_LOGIN: &str = "/auth/login";
pub const POST_AUTH_LOGOUT: &str = "/auth/logout";
pub const POST_AUTH_REFRESH: &str = "/auth/refresh";
pub const POST_AUTH_VALIDATE: &str = "/auth/validate";
pub const GET_AUTH_ME: &str = "/auth/me";
pub const POST_AUTH_LOGOUT_ALL: &str = "/auth/logout-all";
pub const PUT_AUTH_PASSWORD: &str = "/auth/password";
pub const AUTH_CONFIG: &str = "/auth/config";

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SessionService>,
    /// Cancelled on shutdown. Each request works under a child token.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(service: SessionService) -> Self {
        Self {
            service: Arc::new(service),
            shutdown: CancellationToken::new(),
        }
    }
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    // Public routes (no auth required)
    let public = Router::new()
        .route(POST_AUTH_SIGNUP, post(auth::signup_handler))
        .route(POST_AUTH_LOGIN, post(auth::login_handler))
        .route(POST_AUTH_LOGOUT, post(auth::logout_handler))
        .route(POST_AUTH_REFRESH, post(auth::refresh_handler))
        .route(POST_AUTH_VALIDATE, post(auth::validate_handler));

    // Protected routes (require a valid access token)
    let protected = Router::new()
        .route(GET_AUTH_ME, get(auth::me_handler))
        .route(POST_AUTH_LOGOUT_ALL, post(auth::logout_all_handler))
        .route(PUT_AUTH_PASSWORD, put(auth::change_password_handler))
        .route(
            AUTH_CONFIG,
            get(config_handlers::get_config_handler)
                .put(config_handlers::update_config_handler),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_auth,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
