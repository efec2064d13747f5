//! Authentication domain models.
//!
//! These are the records owned by the credential store plus the claim sets
//! carried inside issued tokens. HTTP-facing shapes live in `tally_api`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stored user record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Caller-supplied identity key, unique across the store.
    pub id: String,
    /// Password digest produced by the credential hasher. Never plaintext.
    pub password_hash: String,
    /// User preference blob.
    pub config: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// New user with an empty config.
    pub fn new(id: impl Into<String>, password_hash: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            password_hash: password_hash.into(),
            config: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update of a user record. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub id: String,
    pub password_hash: Option<String>,
    pub config: Option<serde_json::Value>,
}

/// Claims shared by every issued token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub user_id: String,
    /// Per-issuance disambiguator. Not guaranteed unique.
    pub nonce: u64,
}

/// JWT claims embedded in access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject: user ID (standard JWT `sub` claim).
    pub sub: String,
    pub nonce: u64,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Expiry (unix timestamp).
    pub exp: i64,
}

/// Refresh token record stored by the credential store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    /// The refresh token id exactly as handed to the client.
    pub id: String,
    pub claims: TokenClaims,
    pub expires_at: DateTime<Utc>,
    /// Set on logout. Revoked rows are kept for audit.
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    /// Whether the record has reached its expiry at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn refresh_record_expires_at_boundary() {
        let now = Utc::now();
        let record = RefreshTokenRecord {
            id: "t".into(),
            claims: TokenClaims {
                user_id: "alice".into(),
                nonce: 1,
            },
            expires_at: now,
            revoked_at: None,
            created_at: now - Duration::days(1),
        };
        assert!(record.is_expired(now));
        assert!(!record.is_expired(now - Duration::seconds(1)));
    }

    #[test]
    fn new_user_has_no_config() {
        let user = User::new("alice", "digest", Utc::now());
        assert!(user.config.is_none());
        assert_eq!(user.created_at, user.updated_at);
    }
}
