//! Nonce generators for token claims.
//!
//! A nonce keeps two tokens issued to the same user in the same instant
//! apart. It is not a uniqueness guarantee and must not be used for replay
//! protection.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::{Rng, rng};

/// Produces per-issuance nonces.
pub trait NonceGenerator: Send + Sync {
    fn generate(&self) -> u64;
}

/// Random 64-bit nonces. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomNonce;

impl NonceGenerator for RandomNonce {
    fn generate(&self) -> u64 {
        rng().random()
    }
}

/// Time-derived nonces in `0..9999`. Collides readily; kept for
/// compatibility with clients that expect small nonces.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeNonce;

impl TimeNonce {
    const MODULUS: u128 = 9999;
}

impl NonceGenerator for TimeNonce {
    fn generate(&self) -> u64 {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        (nanos % Self::MODULUS) as u64
    }
}

impl<F> NonceGenerator for F
where
    F: Fn() -> u64 + Send + Sync,
{
    fn generate(&self) -> u64 {
        self()
    }
}
