//! Password hashing via SHA-256 pre-hash + bcrypt.
//!
//! bcrypt only looks at the first 72 bytes of its input, so every password is
//! first reduced to its 64-char SHA-256 hex digest.

use sha2::{Digest, Sha256};

use super::AuthError;

/// Default bcrypt cost factor.
pub const DEFAULT_SALT_ROUND: u32 = 10;

/// Cost range accepted by bcrypt.
const MIN_SALT_ROUND: u32 = 4;
const MAX_SALT_ROUND: u32 = 31;

/// One-way password hasher with a fixed bcrypt cost.
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    cost: u32,
}

impl PasswordHasher {
    /// Creates a hasher, rejecting costs bcrypt cannot use.
    pub fn new(cost: u32) -> Result<Self, AuthError> {
        if !(MIN_SALT_ROUND..=MAX_SALT_ROUND).contains(&cost) {
            return Err(AuthError::Config(format!(
                "salt password round must be within {}..={}, got {cost}",
                MIN_SALT_ROUND, MAX_SALT_ROUND
            )));
        }
        Ok(Self { cost })
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Hash a password. Two calls with the same input give different digests.
    pub fn hash(&self, password: &str) -> Result<String, AuthError> {
        bcrypt::hash(prehash(password), self.cost)
            .map_err(|e| AuthError::Internal(format!("bcrypt hash: {e}")))
    }

    /// Verify a password against a stored digest. Malformed digests verify as
    /// `false`.
    pub fn verify(&self, digest: &str, password: &str) -> bool {
        bcrypt::verify(prehash(password), digest).unwrap_or(false)
    }
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self {
            cost: DEFAULT_SALT_ROUND,
        }
    }
}

/// SHA-256 hex digest of the raw password.
fn prehash(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}
