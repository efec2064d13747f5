//! API server configuration.

use std::path::PathBuf;
use std::str::FromStr;

use chrono::Duration;
use jsonwebtoken::Algorithm;
use tally_core::auth::SessionOptions;
use tally_core::auth::jwt::AccessKey;
use tally_core::auth::secret::{ACCESS_SECRET_FILE, REFRESH_SECRET_FILE, resolve_secret};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("cannot read {var} at {path}: {source}")]
    KeyFile {
        var: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Which credential store backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// Embedded key-value store, optionally persisted to a file.
    Kv,
    /// SQLite through sqlx.
    Sql,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "kv" => Ok(StoreBackend::Kv),
            "sql" | "sqlite" => Ok(StoreBackend::Sql),
            other => Err(format!("unknown store backend `{other}` (expected kv or sql)")),
        }
    }
}

/// Configuration for the API server.
#[derive(Clone)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "127.0.0.1:3200").
    pub bind_addr: String,
    pub store_backend: StoreBackend,
    /// SQLite connection URL, used by the sql backend.
    pub database_url: String,
    /// Persistence file for the kv backend. `None` keeps it in memory.
    pub kv_path: Option<PathBuf>,
    pub session: SessionOptions,
    pub access_key: AccessKey,
    pub refresh_secret: String,
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("bind_addr", &self.bind_addr)
            .field("store_backend", &self.store_backend)
            .field("database_url", &self.database_url)
            .field("kv_path", &self.kv_path)
            .field("session", &self.session)
            .field("access_key", &self.access_key)
            .finish_non_exhaustive()
    }
}

impl ApiConfig {
    /// Reads configuration from environment variables with sensible defaults.
    ///
    /// | Variable                          | Default                          |
    /// |-----------------------------------|----------------------------------|
    /// | `BIND_ADDR`                       | `127.0.0.1:3200`                 |
    /// | `STORE_BACKEND`                   | `kv`                             |
    /// | `DATABASE_URL`                    | `sqlite://tally.db`              |
    /// | `KV_PATH`                         | unset (in memory)                |
    /// | `SALT_PASSWORD_ROUND`             | `10`                             |
    /// | `ACCESS_TOKEN_EXPIRE_AFTER_SECS`  | `600`                            |
    /// | `REFRESH_TOKEN_EXPIRE_AFTER_SECS` | `2592000`                        |
    /// | `ACCESS_TOKEN_SIGNING_METHOD`     | `HS256`                          |
    /// | `ACCESS_TOKEN_SECRET`             | generated & persisted to file    |
    /// | `REFRESH_TOKEN_SECRET`            | generated & persisted to file    |
    /// | `ACCESS_TOKEN_PRIVATE_KEY_PATH`   | required for non-HMAC methods    |
    /// | `ACCESS_TOKEN_PUBLIC_KEY_PATH`    | required for non-HMAC methods    |
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = SessionOptions::default();

        let store_backend = match env_opt("STORE_BACKEND") {
            Some(raw) => raw.parse().map_err(|reason| ConfigError::Invalid {
                var: "STORE_BACKEND",
                reason,
            })?,
            None => StoreBackend::Kv,
        };

        let salt_password_round = match env_opt("SALT_PASSWORD_ROUND") {
            Some(raw) => parse_num::<u32>("SALT_PASSWORD_ROUND", &raw)?,
            None => defaults.salt_password_round,
        };
        let access_token_expire_after = match env_opt("ACCESS_TOKEN_EXPIRE_AFTER_SECS") {
            Some(raw) => Duration::seconds(parse_num("ACCESS_TOKEN_EXPIRE_AFTER_SECS", &raw)?),
            None => defaults.access_token_expire_after,
        };
        let refresh_token_expire_after = match env_opt("REFRESH_TOKEN_EXPIRE_AFTER_SECS") {
            Some(raw) => Duration::seconds(parse_num("REFRESH_TOKEN_EXPIRE_AFTER_SECS", &raw)?),
            None => defaults.refresh_token_expire_after,
        };
        let signing_method = match env_opt("ACCESS_TOKEN_SIGNING_METHOD") {
            Some(raw) => {
                Algorithm::from_str(&raw.to_ascii_uppercase()).map_err(|e| {
                    ConfigError::Invalid {
                        var: "ACCESS_TOKEN_SIGNING_METHOD",
                        reason: e.to_string(),
                    }
                })?
            }
            None => defaults.access_token_signing_method,
        };

        let session = SessionOptions::default()
            .with_salt_password_round(salt_password_round)
            .with_access_token_expire_after(access_token_expire_after)
            .with_refresh_token_expire_after(refresh_token_expire_after)
            .with_access_token_signing_method(signing_method);

        let access_key = if is_hmac(signing_method) {
            AccessKey::Secret(
                resolve_secret(&["ACCESS_TOKEN_SECRET"], ACCESS_SECRET_FILE).into_bytes(),
            )
        } else {
            AccessKey::Pem {
                private: read_key_file("ACCESS_TOKEN_PRIVATE_KEY_PATH")?,
                public: read_key_file("ACCESS_TOKEN_PUBLIC_KEY_PATH")?,
            }
        };

        Ok(Self {
            bind_addr: env_opt("BIND_ADDR").unwrap_or_else(|| "127.0.0.1:3200".into()),
            store_backend,
            database_url: env_opt("DATABASE_URL").unwrap_or_else(|| "sqlite://tally.db".into()),
            kv_path: env_opt("KV_PATH").map(PathBuf::from),
            session,
            access_key,
            refresh_secret: resolve_secret(&["REFRESH_TOKEN_SECRET"], REFRESH_SECRET_FILE),
        })
    }
}

fn env_opt(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn parse_num<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        reason: e.to_string(),
    })
}

fn is_hmac(alg: Algorithm) -> bool {
    matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

fn read_key_file(var: &'static str) -> Result<Vec<u8>, ConfigError> {
    let path = env_opt(var).map(PathBuf::from).ok_or(ConfigError::Invalid {
        var,
        reason: "required by the configured signing method".into(),
    })?;
    std::fs::read(&path).map_err(|source| ConfigError::KeyFile { var, path, source })
}
