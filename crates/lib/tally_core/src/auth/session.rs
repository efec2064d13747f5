//! Session service: sign-up, login, logout and token validation.
//!
//! The service keeps no per-session state of its own; everything durable
//! lives in the credential store, so one instance is shared across requests
//! behind an `Arc`. Every store call races the caller's
//! [`CancellationToken`] and yields [`AuthError::Cancelled`] if it loses.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::jwt::{AccessKey, AccessTokenCodec};
use super::nonce::{NonceGenerator, RandomNonce};
use super::password::PasswordHasher;
use super::refresh::RefreshTokenCodec;
use super::secret::generate_secret;
use super::{AuthError, IssuedToken, SessionOptions};
use crate::models::auth::{RefreshTokenRecord, TokenClaims, User, UserUpdate};
use crate::store::{CredentialStore, StoreError};

/// How many nonces to try before giving up on a colliding refresh token id.
const MAX_REFRESH_ID_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct SignUpRequest {
    pub user_id: String,
    pub password: String,
}

#[derive(Clone)]
pub struct LoginRequest {
    pub user_id: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct LoginReply {
    pub access_token: IssuedToken,
    pub refresh_token: IssuedToken,
}

#[derive(Debug, Clone)]
pub struct LogoutRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone)]
pub struct ValidateAccessTokenRequest {
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidateAccessTokenReply {
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ValidateRefreshTokenRequest {
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidateRefreshTokenReply {
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone)]
pub struct RefreshReply {
    pub access_token: IssuedToken,
}

#[derive(Clone)]
pub struct ChangePasswordRequest {
    pub user_id: String,
    pub old_password: String,
    pub new_password: String,
}

#[derive(Debug, Clone)]
pub struct UpdateConfigRequest {
    pub user_id: String,
    pub config: serde_json::Value,
}

/// Run `fut` unless `ct` is cancelled first.
async fn guard<T>(ct: &CancellationToken, fut: impl Future<Output = T>) -> Result<T, AuthError> {
    tokio::select! {
        biased;
        _ = ct.cancelled() => Err(AuthError::Cancelled),
        out = fut => Ok(out),
    }
}

/// Orchestrates credential and token lifecycles over a credential store.
pub struct SessionService {
    store: Arc<dyn CredentialStore>,
    hasher: PasswordHasher,
    access: AccessTokenCodec,
    refresh: RefreshTokenCodec,
    nonce: Arc<dyn NonceGenerator>,
    clock: Arc<dyn Clock>,
    /// Verified against when the user is unknown, so both login failure
    /// paths pay for one bcrypt verification.
    dummy_digest: String,
}

impl SessionService {
    /// Start building a service over `store`. The two keys must differ.
    pub fn builder(
        store: Arc<dyn CredentialStore>,
        access_key: AccessKey,
        refresh_key: impl Into<Vec<u8>>,
    ) -> SessionServiceBuilder {
        SessionServiceBuilder {
            store,
            access_key,
            refresh_key: refresh_key.into(),
            options: SessionOptions::default(),
            nonce: Arc::new(RandomNonce),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn access_token_expire_after(&self) -> chrono::Duration {
        self.access.ttl()
    }

    pub fn refresh_token_expire_after(&self) -> chrono::Duration {
        self.refresh.ttl()
    }

    fn claims(&self, user_id: &str) -> TokenClaims {
        TokenClaims {
            user_id: user_id.to_string(),
            nonce: self.nonce.generate(),
        }
    }

    async fn hash_password(
        &self,
        ct: &CancellationToken,
        password: &str,
    ) -> Result<String, AuthError> {
        let hasher = self.hasher;
        let password = password.to_owned();
        guard(ct, tokio::task::spawn_blocking(move || hasher.hash(&password)))
            .await?
            .map_err(|e| AuthError::Internal(format!("hash task: {e}")))?
    }

    async fn verify_password(
        &self,
        ct: &CancellationToken,
        digest: String,
        password: &str,
    ) -> Result<bool, AuthError> {
        let hasher = self.hasher;
        let password = password.to_owned();
        guard(
            ct,
            tokio::task::spawn_blocking(move || hasher.verify(&digest, &password)),
        )
        .await?
        .map_err(|e| AuthError::Internal(format!("verify task: {e}")))
    }

    /// Fetch a user, mapping absence to `None`.
    async fn find_user(&self, ct: &CancellationToken, user_id: &str) -> Result<Option<User>, AuthError> {
        match guard(ct, self.store.get_user(user_id)).await? {
            Ok(user) => Ok(Some(user)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(AuthError::Store(e)),
        }
    }

    /// Fetch a user and check their password. Both failure halves give the
    /// same error.
    async fn authenticate(
        &self,
        ct: &CancellationToken,
        user_id: &str,
        password: &str,
    ) -> Result<User, AuthError> {
        let user = self.find_user(ct, user_id).await?;
        let digest = user
            .as_ref()
            .map_or_else(|| self.dummy_digest.clone(), |u| u.password_hash.clone());
        let matched = self.verify_password(ct, digest, password).await?;

        match user {
            Some(user) if matched => Ok(user),
            _ => {
                debug!(user_id, "credential check failed");
                Err(AuthError::UserNotFoundOrInvalidPassword)
            }
        }
    }

    /// Issue a refresh token and persist its record before returning.
    async fn persist_refresh_token(
        &self,
        ct: &CancellationToken,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, AuthError> {
        for _ in 0..MAX_REFRESH_ID_ATTEMPTS {
            let (token, record) = self.refresh.issue(&self.claims(user_id), now)?;
            match guard(ct, self.store.create_token(&record)).await? {
                Ok(()) => return Ok(token),
                Err(StoreError::Exists) => {
                    warn!(user_id, "refresh token id collision, regenerating nonce");
                }
                Err(e) => return Err(AuthError::Store(e)),
            }
        }
        Err(AuthError::Internal(
            "could not allocate a unique refresh token id".into(),
        ))
    }

    /// Decode a refresh token id and load its live, unexpired record.
    async fn live_refresh_record(
        &self,
        ct: &CancellationToken,
        token: &str,
    ) -> Result<RefreshTokenRecord, AuthError> {
        self.refresh.decode(token)?;

        let record = match guard(ct, self.store.get_token(token)).await? {
            Ok(record) => record,
            Err(StoreError::NotFound) => return Err(AuthError::InvalidToken),
            Err(e) => return Err(AuthError::Store(e)),
        };

        if record.revoked_at.is_some() {
            return Err(AuthError::InvalidToken);
        }
        if record.is_expired(self.clock.now()) {
            return Err(AuthError::TokenExpired);
        }
        Ok(record)
    }

    /// Register a new user with an empty config.
    pub async fn sign_up(&self, ct: &CancellationToken, req: SignUpRequest) -> Result<(), AuthError> {
        let digest = self.hash_password(ct, &req.password).await?;
        let user = User::new(req.user_id.as_str(), digest, self.clock.now());

        match guard(ct, self.store.create_user(&user)).await? {
            Ok(()) => {
                info!(user_id = %user.id, "user signed up");
                Ok(())
            }
            Err(StoreError::Exists) => Err(AuthError::UserExists),
            Err(e) => Err(AuthError::Store(e)),
        }
    }

    /// Check credentials and issue an access/refresh token pair.
    pub async fn login(&self, ct: &CancellationToken, req: LoginRequest) -> Result<LoginReply, AuthError> {
        let user = self.authenticate(ct, &req.user_id, &req.password).await?;

        let now = self.clock.now();
        let access_token = self.access.issue(&self.claims(&user.id), now)?;
        let refresh_token = self.persist_refresh_token(ct, &user.id, now).await?;

        info!(user_id = %user.id, "user logged in");
        Ok(LoginReply {
            access_token,
            refresh_token,
        })
    }

    /// Revoke the presented refresh token. Other sessions are untouched.
    pub async fn logout(&self, ct: &CancellationToken, req: LogoutRequest) -> Result<(), AuthError> {
        self.refresh.decode(&req.refresh_token)?;

        let now = self.clock.now();
        let record = match guard(ct, self.store.delete_token(&req.refresh_token, now)).await? {
            Ok(record) => record,
            Err(StoreError::NotFound) => return Err(AuthError::InvalidToken),
            Err(e) => return Err(AuthError::Store(e)),
        };

        if record.is_expired(now) {
            return Err(AuthError::TokenExpired);
        }
        info!(user_id = %record.claims.user_id, "refresh token revoked");
        Ok(())
    }

    /// Revoke every live refresh token of `user_id`.
    pub async fn logout_all(&self, ct: &CancellationToken, user_id: &str) -> Result<u64, AuthError> {
        let now = self.clock.now();
        let revoked = guard(ct, self.store.revoke_user_tokens(user_id, now))
            .await?
            .map_err(AuthError::Store)?;
        info!(user_id, revoked, "all refresh tokens revoked");
        Ok(revoked)
    }

    /// Stateless access token check. No store access.
    pub fn validate_access_token(
        &self,
        req: ValidateAccessTokenRequest,
    ) -> Result<ValidateAccessTokenReply, AuthError> {
        let claims = self.access.verify(&req.token, self.clock.now())?;
        let expires_at = DateTime::from_timestamp(claims.exp, 0).ok_or(AuthError::InvalidToken)?;
        Ok(ValidateAccessTokenReply {
            user_id: claims.sub,
            expires_at,
        })
    }

    /// Read-only refresh token check. The token is neither rotated nor
    /// extended.
    pub async fn validate_refresh_token(
        &self,
        ct: &CancellationToken,
        req: ValidateRefreshTokenRequest,
    ) -> Result<ValidateRefreshTokenReply, AuthError> {
        let record = self.live_refresh_record(ct, &req.token).await?;
        Ok(ValidateRefreshTokenReply {
            user_id: record.claims.user_id,
            expires_at: record.expires_at,
        })
    }

    /// Mint a new access token from a live refresh token.
    pub async fn refresh(&self, ct: &CancellationToken, req: RefreshRequest) -> Result<RefreshReply, AuthError> {
        let record = self.live_refresh_record(ct, &req.refresh_token).await?;
        let access_token = self
            .access
            .issue(&self.claims(&record.claims.user_id), self.clock.now())?;
        debug!(user_id = %record.claims.user_id, "access token refreshed");
        Ok(RefreshReply { access_token })
    }

    /// Replace a user's password after checking the current one.
    pub async fn change_password(
        &self,
        ct: &CancellationToken,
        req: ChangePasswordRequest,
    ) -> Result<(), AuthError> {
        self.authenticate(ct, &req.user_id, &req.old_password).await?;
        let digest = self.hash_password(ct, &req.new_password).await?;

        let update = UserUpdate {
            id: req.user_id.clone(),
            password_hash: Some(digest),
            config: None,
        };
        self.update_user(ct, &update).await?;
        info!(user_id = %req.user_id, "password changed");
        Ok(())
    }

    /// Replace a user's preference blob.
    pub async fn update_config(&self, ct: &CancellationToken, req: UpdateConfigRequest) -> Result<(), AuthError> {
        let update = UserUpdate {
            id: req.user_id,
            password_hash: None,
            config: Some(req.config),
        };
        self.update_user(ct, &update).await
    }

    /// Current preference blob of a user.
    pub async fn get_config(
        &self,
        ct: &CancellationToken,
        user_id: &str,
    ) -> Result<Option<serde_json::Value>, AuthError> {
        self.find_user(ct, user_id)
            .await?
            .map(|user| user.config)
            .ok_or(AuthError::UserNotFoundOrInvalidPassword)
    }

    async fn update_user(&self, ct: &CancellationToken, update: &UserUpdate) -> Result<(), AuthError> {
        match guard(ct, self.store.update_user(update, self.clock.now())).await? {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound) => Err(AuthError::UserNotFoundOrInvalidPassword),
            Err(e) => Err(AuthError::Store(e)),
        }
    }
}

/// Builder for [`SessionService`].
pub struct SessionServiceBuilder {
    store: Arc<dyn CredentialStore>,
    access_key: AccessKey,
    refresh_key: Vec<u8>,
    options: SessionOptions,
    nonce: Arc<dyn NonceGenerator>,
    clock: Arc<dyn Clock>,
}

impl SessionServiceBuilder {
    pub fn options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn nonce_generator(mut self, nonce: impl NonceGenerator + 'static) -> Self {
        self.nonce = Arc::new(nonce);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<SessionService, AuthError> {
        let options = self.options;
        options.validate()?;

        if let AccessKey::Secret(secret) = &self.access_key
            && *secret == self.refresh_key
        {
            return Err(AuthError::Config(
                "access and refresh token secrets must differ".into(),
            ));
        }

        let hasher = PasswordHasher::new(options.salt_password_round)?;
        let access = AccessTokenCodec::new(
            options.access_token_signing_method,
            &self.access_key,
            options.access_token_expire_after,
        )?;
        let refresh = RefreshTokenCodec::new(self.refresh_key, options.refresh_token_expire_after)?;
        let dummy_digest = hasher.hash(&generate_secret())?;

        info!(
            salt_password_round = options.salt_password_round,
            access_token_expire_after_secs = options.access_token_expire_after.num_seconds(),
            refresh_token_expire_after_secs = options.refresh_token_expire_after.num_seconds(),
            signing_method = ?options.access_token_signing_method,
            "session service configured"
        );

        Ok(SessionService {
            store: self.store,
            hasher,
            access,
            refresh,
            nonce: self.nonce,
            clock: self.clock,
            dummy_digest,
        })
    }
}
