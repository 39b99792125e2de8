//! Username and password shape checks shared by login and account creation.

use crate::error::{KioskError, KioskResult};

/// Longest accepted username.
pub const MAX_USERNAME_LEN: usize = 50;
/// Longest accepted password.
pub const MAX_PASSWORD_LEN: usize = 100;

/// Validate a username: 1..=50 chars from `[A-Za-z0-9_-@.]`.
pub fn validate_username(username: &str) -> KioskResult<()> {
    if username.is_empty() {
        return Err(KioskError::InvalidUsername("empty".into()));
    }
    if username.chars().count() > MAX_USERNAME_LEN {
        return Err(KioskError::InvalidUsername(format!(
            "longer than {MAX_USERNAME_LEN} characters"
        )));
    }
    if let Some(c) = username.chars().find(|c| !is_username_char(*c)) {
        return Err(KioskError::InvalidUsername(format!(
            "illegal character {c:?}"
        )));
    }
    Ok(())
}

/// Whether a password is within the accepted length.
pub fn password_len_ok(password: &str) -> bool {
    !password.is_empty() && password.chars().count() <= MAX_PASSWORD_LEN
}

fn is_username_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '@' | '.')
}
