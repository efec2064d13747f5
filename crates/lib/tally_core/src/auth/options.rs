//! Session service options.

use chrono::Duration;
use jsonwebtoken::Algorithm;

use super::AuthError;
use super::password::DEFAULT_SALT_ROUND;

/// Tunables for the session service.
///
/// | Field                         | Default  |
/// |-------------------------------|----------|
/// | `salt_password_round`         | 10       |
/// | `refresh_token_expire_after`  | 30 days  |
/// | `access_token_expire_after`   | 10 min   |
/// | `access_token_signing_method` | HS256    |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// bcrypt cost used when hashing passwords.
    pub salt_password_round: u32,
    pub refresh_token_expire_after: Duration,
    pub access_token_expire_after: Duration,
    pub access_token_signing_method: Algorithm,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            salt_password_round: DEFAULT_SALT_ROUND,
            refresh_token_expire_after: Duration::days(30),
            access_token_expire_after: Duration::minutes(10),
            access_token_signing_method: Algorithm::HS256,
        }
    }
}

impl SessionOptions {
    pub fn with_salt_password_round(mut self, round: u32) -> Self {
        self.salt_password_round = round;
        self
    }

    pub fn with_refresh_token_expire_after(mut self, after: Duration) -> Self {
        self.refresh_token_expire_after = after;
        self
    }

    pub fn with_access_token_expire_after(mut self, after: Duration) -> Self {
        self.access_token_expire_after = after;
        self
    }

    pub fn with_access_token_signing_method(mut self, method: Algorithm) -> Self {
        self.access_token_signing_method = method;
        self
    }

    /// Reject non-positive lifetimes. The salt round is checked by the hasher.
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.access_token_expire_after <= Duration::zero() {
            return Err(AuthError::Config(
                "access token expire-after must be positive".into(),
            ));
        }
        if self.refresh_token_expire_after <= Duration::zero() {
            return Err(AuthError::Config(
                "refresh token expire-after must be positive".into(),
            ));
        }
        Ok(())
    }
}
