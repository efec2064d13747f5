//! Refresh tokens: opaque, store-backed references.
//!
//! A token id is `b64(claims_json) "." b64(hmac_sha256(claims_json))`. The tag
//! lets malformed or forged ids be rejected without a store round trip, but a
//! well-formed id is only honoured while its record is live in the store.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::{AuthError, IssuedToken};
use crate::models::auth::{RefreshTokenRecord, TokenClaims};

type HmacSha256 = Hmac<Sha256>;

/// Builds and checks refresh token ids.
#[derive(Clone)]
pub struct RefreshTokenCodec {
    key: Vec<u8>,
    ttl: Duration,
}

impl RefreshTokenCodec {
    pub fn new(key: impl Into<Vec<u8>>, ttl: Duration) -> Result<Self, AuthError> {
        let key = key.into();
        if key.is_empty() {
            return Err(AuthError::Config("refresh token secret is empty".into()));
        }
        let codec = Self { key, ttl };
        codec.mac()?;
        Ok(codec)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn mac(&self) -> Result<HmacSha256, AuthError> {
        HmacSha256::new_from_slice(&self.key)
            .map_err(|e| AuthError::Config(format!("refresh token key: {e}")))
    }

    /// Build the token id and the record to persist for it.
    pub fn issue(
        &self,
        claims: &TokenClaims,
        now: DateTime<Utc>,
    ) -> Result<(IssuedToken, RefreshTokenRecord), AuthError> {
        let payload = serde_json::to_vec(claims)
            .map_err(|e| AuthError::Internal(format!("refresh claims encode: {e}")))?;

        let mut mac = self.mac()?;
        mac.update(&payload);
        let tag = mac.finalize().into_bytes();

        let id = format!("{}.{}", URL_SAFE_NO_PAD.encode(&payload), URL_SAFE_NO_PAD.encode(tag));
        let expires_at = now + self.ttl;

        let record = RefreshTokenRecord {
            id: id.clone(),
            claims: claims.clone(),
            expires_at,
            revoked_at: None,
            created_at: now,
        };
        let token = IssuedToken {
            id,
            expires_at,
            expire_after: self.ttl,
        };
        Ok((token, record))
    }

    /// Offline format check: decode the id and verify its tag.
    pub fn decode(&self, id: &str) -> Result<TokenClaims, AuthError> {
        let (payload, tag) = id.split_once('.').ok_or(AuthError::InvalidToken)?;
        let payload = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| AuthError::InvalidToken)?;
        let tag = URL_SAFE_NO_PAD
            .decode(tag)
            .map_err(|_| AuthError::InvalidToken)?;

        let mut mac = self.mac()?;
        mac.update(&payload);
        mac.verify_slice(&tag).map_err(|_| AuthError::InvalidToken)?;

        serde_json::from_slice(&payload).map_err(|_| AuthError::InvalidToken)
    }
}
