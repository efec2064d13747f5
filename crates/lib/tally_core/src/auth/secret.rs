//! Signing secret resolution.

use std::path::{Path, PathBuf};

use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use tracing::{info, warn};

/// Secret file name for access-token signing.
pub const ACCESS_SECRET_FILE: &str = "access-token-secret";

/// Secret file name for refresh-token HMAC.
pub const REFRESH_SECRET_FILE: &str = "refresh-token-secret";

/// Resolve a secret: first non-empty env var in `env_vars` → persisted file
/// `file_name` → freshly generated and persisted.
pub fn resolve_secret(env_vars: &[&str], file_name: &str) -> String {
    for var in env_vars {
        if let Ok(secret) = std::env::var(var)
            && !secret.is_empty()
        {
            return secret;
        }
    }
    load_or_create(&secret_path(file_name))
}

/// Read the secret stored at `secret_path`, or generate one and try to
/// store it there.
fn load_or_create(secret_path: &Path) -> String {
    if let Ok(existing) = std::fs::read_to_string(secret_path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let secret = generate_secret();
    if let Some(parent) = secret_path.parent()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        warn!(
            path = %parent.display(),
            error = %e,
            "could not create secret directory"
        );
    }
    match std::fs::write(secret_path, &secret) {
        Ok(()) => info!(path = %secret_path.display(), "generated new signing secret"),
        Err(e) => warn!(
            path = %secret_path.display(),
            error = %e,
            "could not persist signing secret; tokens will not survive a restart"
        ),
    }
    secret
}

/// 64 random alphanumeric characters.
pub fn generate_secret() -> String {
    rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect()
}

/// Path to a persisted secret file.
fn secret_path(file_name: &str) -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tally")
        .join(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_secrets_are_distinct() {
        let a = generate_secret();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, generate_secret());
    }

    #[test]
    fn creates_missing_directories_and_reuses_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tally").join("nested").join("secret");

        let first = load_or_create(&path);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), first);
        assert_eq!(load_or_create(&path), first);
    }

    #[test]
    fn unwritable_location_still_yields_a_secret() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        // The parent "directory" is a regular file, so creation fails.
        let path = blocker.join("secret");

        let secret = load_or_create(&path);
        assert_eq!(secret.len(), 64);
        assert!(!path.exists());
        assert_ne!(load_or_create(&path), secret);
    }
}
