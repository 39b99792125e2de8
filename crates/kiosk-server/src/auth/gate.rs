//! Credential and account checks run before a connection is admitted.
//!
//! Login is two-phase: [`stored_hash`] reads the credential under the hub
//! lock, [`verify_off_thread`] runs the slow Argon2 comparison without it,
//! and [`check_account`] re-reads the account under the lock right before
//! admission so a password change or delete in between is noticed.

use crate::session::SessionRegistry;
use kiosk_core::identity::{password_len_ok, validate_username};
use kiosk_core::password::{hash_password, verify_password};
use kiosk_core::{KioskError, KioskResult, Ledger, User};
use tracing::warn;

/// Shape checks that need no ledger access.
pub fn precheck(username: &str, password: &str) -> KioskResult<()> {
    if validate_username(username).is_err() || !password_len_ok(password) {
        return Err(KioskError::InvalidCredentials);
    }
    Ok(())
}

/// The stored hash for `username`, or `InvalidCredentials`.
pub fn stored_hash(ledger: &Ledger, username: &str) -> KioskResult<String> {
    ledger
        .user(username)
        .map(|u| u.password_hash.clone())
        .filter(|h| !h.is_empty())
        .ok_or(KioskError::InvalidCredentials)
}

/// Argon2 verification on the blocking pool.
pub async fn verify_off_thread(password: &str, hash: &str) -> bool {
    let password = password.to_string();
    let hash = hash.to_string();
    match tokio::task::spawn_blocking(move || verify_password(&password, &hash)).await {
        Ok(ok) => ok,
        Err(e) => {
            warn!(error = %e, "password verification task failed");
            false
        }
    }
}

/// Argon2 hashing on the blocking pool.
pub async fn hash_off_thread(password: &str) -> KioskResult<String> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| KioskError::Codec(format!("hashing task failed: {e}")))?
}

/// Re-read the account and confirm it can start a session: the credential
/// is unchanged since verification and a non-admin has positive balance.
pub fn check_account<'a>(
    ledger: &'a Ledger,
    username: &str,
    verified_hash: &str,
) -> KioskResult<&'a User> {
    let user = ledger
        .user(username)
        .filter(|u| u.password_hash == verified_hash)
        .ok_or(KioskError::InvalidCredentials)?;
    if !user.is_admin() && user.balance <= 0.0 {
        return Err(KioskError::InsufficientBalance);
    }
    Ok(user)
}

/// `DuplicateSession` when `username` already holds a live session.
pub fn check_not_already_active(sessions: &SessionRegistry, username: &str) -> KioskResult<()> {
    if sessions.is_active(username) {
        return Err(KioskError::DuplicateSession);
    }
    Ok(())
}
