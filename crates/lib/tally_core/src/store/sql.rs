//! Relational credential store backed by SQLite.
//!
//! Table-per-entity (`users`, `refresh_tokens`); the user config blob and the
//! token claims are JSON text columns. Primary-key constraints provide
//! create-if-absent.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::info;

use super::{CredentialStore, Result, StoreError};
use crate::models::auth::{RefreshTokenRecord, TokenClaims, User, UserUpdate};

type UserRow = (String, String, Option<String>, DateTime<Utc>, DateTime<Utc>);
type TokenRow = (String, String, DateTime<Utc>, Option<DateTime<Utc>>, DateTime<Utc>);

/// Relational credential store.
#[derive(Debug, Clone)]
pub struct SqlStore {
    pool: SqlitePool,
}

impl SqlStore {
    /// Wraps an existing pool. Migrations are not run.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connects to `url`, creating the database file if needed, and runs
    /// migrations.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        crate::migrate::migrate(&pool).await?;
        info!(url, "connected relational credential store");
        Ok(Self { pool })
    }

    /// Private in-memory database, migrated. The single connection is kept
    /// open for the life of the pool so the data survives.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        crate::migrate::migrate(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Map a unique-constraint violation to `Exists`.
fn insert_error(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e
        && db.is_unique_violation()
    {
        return StoreError::Exists;
    }
    StoreError::Sql(e)
}

fn user_from_row(row: UserRow) -> Result<User> {
    let (id, password_hash, config, created_at, updated_at) = row;
    let config = config.map(|c| serde_json::from_str(&c)).transpose()?;
    Ok(User {
        id,
        password_hash,
        config,
        created_at,
        updated_at,
    })
}

fn token_from_row(row: TokenRow) -> Result<RefreshTokenRecord> {
    let (id, claims, expires_at, revoked_at, created_at) = row;
    let claims: TokenClaims = serde_json::from_str(&claims)?;
    Ok(RefreshTokenRecord {
        id,
        claims,
        expires_at,
        revoked_at,
        created_at,
    })
}

#[async_trait]
impl CredentialStore for SqlStore {
    async fn create_user(&self, user: &User) -> Result<()> {
        let config = user.config.as_ref().map(serde_json::to_string).transpose()?;
        sqlx::query(
            "INSERT INTO users (id, password_hash, config, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&user.id)
        .bind(&user.password_hash)
        .bind(config)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(insert_error)?;
        Ok(())
    }

    async fn get_user(&self, id: &str) -> Result<User> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, password_hash, config, created_at, updated_at FROM users WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(user_from_row).ok_or(StoreError::NotFound)?
    }

    async fn update_user(&self, update: &UserUpdate, now: DateTime<Utc>) -> Result<()> {
        let password_hash = update.password_hash.as_deref().filter(|h| !h.is_empty());
        let config = update.config.as_ref().map(serde_json::to_string).transpose()?;
        let result = sqlx::query(
            "UPDATE users SET \
               password_hash = COALESCE(?1, password_hash), \
               config = COALESCE(?2, config), \
               updated_at = ?3 \
             WHERE id = ?4",
        )
        .bind(password_hash)
        .bind(config)
        .bind(now)
        .bind(&update.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn create_token(&self, token: &RefreshTokenRecord) -> Result<()> {
        let claims = serde_json::to_string(&token.claims)?;
        sqlx::query(
            "INSERT INTO refresh_tokens (id, user_id, claims, expires_at, revoked_at, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&token.id)
        .bind(&token.claims.user_id)
        .bind(claims)
        .bind(token.expires_at)
        .bind(token.revoked_at)
        .bind(token.created_at)
        .execute(&self.pool)
        .await
        .map_err(insert_error)?;
        Ok(())
    }

    async fn get_token(&self, id: &str) -> Result<RefreshTokenRecord> {
        let row = sqlx::query_as::<_, TokenRow>(
            "SELECT id, claims, expires_at, revoked_at, created_at \
             FROM refresh_tokens \
             WHERE id = ?1 AND revoked_at IS NULL",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(token_from_row).ok_or(StoreError::NotFound)?
    }

    async fn delete_token(&self, id: &str, now: DateTime<Utc>) -> Result<RefreshTokenRecord> {
        let row = sqlx::query_as::<_, TokenRow>(
            "UPDATE refresh_tokens SET revoked_at = ?1 \
             WHERE id = ?2 AND revoked_at IS NULL \
             RETURNING id, claims, expires_at, NULL, created_at",
        )
        .bind(now)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(token_from_row).ok_or(StoreError::NotFound)?
    }

    async fn revoke_user_tokens(&self, user_id: &str, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = ?1 \
             WHERE user_id = ?2 AND revoked_at IS NULL",
        )
        .bind(now)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
