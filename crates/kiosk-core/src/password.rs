//! Credential hashing.
//!
//! Passwords are stored as Argon2id PHC strings with a random salt.
//! Verification is constant time with respect to the password contents.

use crate::error::{KioskError, KioskResult};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

/// Hash a password using Argon2id with a fresh salt.
pub fn hash_password(password: &str) -> KioskResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| KioskError::Codec(format!("failed to hash password: {e}")))
}

/// Check `password` against a stored PHC string.
///
/// A malformed or empty hash never verifies.
pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}
