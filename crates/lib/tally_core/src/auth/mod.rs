//! Authentication and session lifecycle.
//!
//! Password hashing, access/refresh token codecs, and the session service
//! that ties them to a [`CredentialStore`](crate::store::CredentialStore).

pub mod clock;
pub mod jwt;
pub mod nonce;
pub mod options;
pub mod password;
pub mod refresh;
pub mod secret;
pub mod session;


use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::store::StoreError;

pub use options::SessionOptions;
pub use session::{SessionService, SessionServiceBuilder};

/// Authentication errors.
///
/// `UserNotFoundOrInvalidPassword` deliberately covers both halves of a
/// failed login. Store-level `NotFound`/`Exists` never appear inside
/// `Store`; they are translated into the variants above it.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("User already exists")]
    UserExists,

    #[error("User not found or invalid password")]
    UserNotFoundOrInvalidPassword,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("Request cancelled")]
    Cancelled,

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// A token handed to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub id: String,
    pub expires_at: DateTime<Utc>,
    /// Lifetime the token was issued with.
    pub expire_after: Duration,
}
