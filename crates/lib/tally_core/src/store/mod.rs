//! Credential store: durable keyed storage for users and refresh tokens.
//!
//! The session service talks to storage only through [`CredentialStore`].
//! Two backends implement it with identical existence semantics:
//!
//! - [`kv::KvStore`]: embedded ordered key-value store, one bucket per
//!   entity, JSON-encoded values, optional file persistence.
//! - [`sql::SqlStore`]: relational store over SQLite, one table per entity.
//!
//! Revoked refresh tokens are retained in both backends with `revoked_at`
//! set, and read back as [`StoreError::NotFound`].

pub mod kv;
pub mod sql;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::auth::{RefreshTokenRecord, User, UserUpdate};

/// Store-layer errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Data not found")]
    NotFound,

    #[error("Data already exists")]
    Exists,

    #[error("Database error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }

    pub fn is_exists(&self) -> bool {
        matches!(self, StoreError::Exists)
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Storage contract consumed by the session service.
///
/// `create_*` must be atomic create-if-absent: with concurrent callers for
/// the same key exactly one succeeds and the rest get [`StoreError::Exists`].
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert a new user. `Exists` if the id is taken.
    async fn create_user(&self, user: &User) -> Result<()>;

    /// Fetch a user by id. `NotFound` if absent.
    async fn get_user(&self, id: &str) -> Result<User>;

    /// Apply the provided fields of `update`. `NotFound` if absent.
    async fn update_user(&self, update: &UserUpdate, now: DateTime<Utc>) -> Result<()>;

    /// Insert a refresh token record. `Exists` if the id is taken.
    async fn create_token(&self, token: &RefreshTokenRecord) -> Result<()>;

    /// Fetch a live (non-revoked) refresh token record. `NotFound` otherwise.
    async fn get_token(&self, id: &str) -> Result<RefreshTokenRecord>;

    /// Revoke a live refresh token, returning the record as it was before.
    /// `NotFound` if absent or already revoked.
    async fn delete_token(&self, id: &str, now: DateTime<Utc>) -> Result<RefreshTokenRecord>;

    /// Revoke every live refresh token of a user. Returns how many were revoked.
    async fn revoke_user_tokens(&self, user_id: &str, now: DateTime<Utc>) -> Result<u64>;
}
