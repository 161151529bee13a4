//! Argon2id password hashing, run off the async executor.

use crate::error::AuthError;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use once_cell::sync::Lazy;
use secrecy::{ExposeSecret, SecretString};

/// Verified against when no principal matches, so unknown accounts cost the
/// same as wrong passwords.
static DUMMY_HASH: Lazy<Option<String>> = Lazy::new(|| hash_blocking("timing-equalizer").ok());

fn hash_blocking(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::PasswordHash(e.to_string()))
}

fn verify_blocking(password: &str, phc: &str) -> bool {
    PasswordHash::new(phc)
        .map(|parsed| Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
        .unwrap_or(false)
}

/// Hash a password into a PHC string.
///
/// # Errors
///
/// Returns `AuthError::PasswordHash` if hashing or the blocking task fails.
pub async fn hash_password(password: SecretString) -> Result<String, AuthError> {
    tokio::task::spawn_blocking(move || hash_blocking(password.expose_secret()))
        .await
        .map_err(|e| AuthError::PasswordHash(e.to_string()))?
}

/// Verify a password against a stored hash. With no hash, a dummy
/// verification runs and the result is `false`.
pub async fn verify_password(password: SecretString, phc: Option<String>) -> bool {
    tokio::task::spawn_blocking(move || match phc {
        Some(phc) => verify_blocking(password.expose_secret(), &phc),
        None => {
            if let Some(dummy) = DUMMY_HASH.as_deref() {
                let _ = verify_blocking(password.expose_secret(), dummy);
            }
            false
        }
    })
    .await
    .unwrap_or(false)
}
