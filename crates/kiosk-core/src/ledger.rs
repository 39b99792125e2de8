//! The ledger: user accounts, balances, and the session history.
//!
//! This is the durable half of the server state. The in-memory copy is
//! authoritative; [`crate::store::LedgerStore`] snapshots it to disk after
//! every mutation.

use crate::error::{KioskError, KioskResult};
use crate::money::round2;
use crate::password;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;

/// Number of log entries included in observer snapshots.
pub const RECENT_LOG_LIMIT: usize = 100;

/// Shortest billing interval honoured (one second).
pub const MIN_INTERVAL_MINUTES: f64 = 1.0 / 60.0;
/// Longest billing interval accepted (one week).
pub const MAX_INTERVAL_MINUTES: f64 = 7.0 * 24.0 * 60.0;

/// Account role. Admins are never billed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn is_admin(self) -> bool {
        matches!(self, Role::Admin)
    }
}

/// A user account as persisted in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Argon2id PHC string.
    #[serde(default)]
    pub password_hash: String,
    /// Remaining prepaid balance.
    #[serde(default)]
    pub balance: f64,
    /// Price per hour of use.
    #[serde(default)]
    pub rate: f64,
    #[serde(default)]
    pub role: Role,
    /// Plaintext credential from ledgers written before hashing was
    /// introduced. Consumed by [`Ledger::migrate_plaintext`], never written.
    #[serde(default, rename = "password", skip_serializing)]
    pub legacy_password: Option<String>,
}

impl User {
    /// A fresh billable account with zero balance.
    pub fn new(password_hash: String, rate: f64) -> Self {
        Self {
            password_hash,
            balance: 0.0,
            rate,
            role: Role::User,
            legacy_password: None,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

/// Immutable record of a finished session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionLogEntry {
    pub username: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Whole minutes, rounded to nearest.
    pub duration: i64,
    /// Total charged during the session, rounded to cents.
    pub cost: f64,
}

impl SessionLogEntry {
    /// Build the entry for a session that ran from `start` to `end` and
    /// accrued `accrued_cost`.
    pub fn closing(
        username: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        accrued_cost: f64,
    ) -> Self {
        let elapsed_ms = (end - start).num_milliseconds().max(0);
        let duration = (elapsed_ms as f64 / 60_000.0).round() as i64;
        Self {
            username: username.into(),
            start_time: start,
            end_time: end,
            duration,
            cost: round2(accrued_cost),
        }
    }
}

/// Users table plus session history, newest entry first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ledger {
    #[serde(default)]
    pub users: BTreeMap<String, User>,
    #[serde(default)]
    pub session_logs: Vec<SessionLogEntry>,
}

impl Ledger {
    pub fn user(&self, username: &str) -> Option<&User> {
        self.users.get(username)
    }

    pub fn user_mut(&mut self, username: &str) -> Option<&mut User> {
        self.users.get_mut(username)
    }

    /// Add `amount` to a user's balance. Returns the new balance.
    pub fn recharge(&mut self, username: &str, amount: f64) -> KioskResult<f64> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(KioskError::InvalidAmountOrUser);
        }
        let user = self
            .users
            .get_mut(username)
            .ok_or(KioskError::InvalidAmountOrUser)?;
        user.balance = round2(user.balance + amount);
        Ok(user.balance)
    }

    /// Prepend a finished session, keeping at most `retention` entries.
    pub fn record_session(&mut self, entry: SessionLogEntry, retention: usize) {
        self.session_logs.insert(0, entry);
        if retention > 0 && self.session_logs.len() > retention {
            self.session_logs.truncate(retention);
        }
    }

    /// The most recent `limit` log entries, newest first.
    pub fn recent_logs(&self, limit: usize) -> &[SessionLogEntry] {
        let end = self.session_logs.len().min(limit);
        &self.session_logs[..end]
    }

    /// Replace plaintext credentials left by older ledgers with hashes.
    ///
    /// Returns how many accounts were rewritten; the caller should persist
    /// the ledger when this is non-zero.
    pub fn migrate_plaintext(&mut self) -> KioskResult<usize> {
        let mut migrated = 0;
        for (username, user) in self.users.iter_mut() {
            if let Some(plain) = user.legacy_password.take() {
                if user.password_hash.is_empty() {
                    user.password_hash = password::hash_password(&plain)?;
                    migrated += 1;
                    info!(username = %username, "migrated plaintext credential");
                }
            }
        }
        Ok(migrated)
    }
}

/// Process-wide settings, persisted separately from the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default = "default_billing_interval_minutes")]
    pub billing_interval_minutes: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            billing_interval_minutes: default_billing_interval_minutes(),
        }
    }
}

fn default_billing_interval_minutes() -> f64 {
    1.0
}

impl Settings {
    /// Billing interval as a duration, clamped to the supported range.
    pub fn billing_interval(&self) -> Duration {
        let minutes = if self.billing_interval_minutes.is_finite() {
            self.billing_interval_minutes
                .clamp(MIN_INTERVAL_MINUTES, MAX_INTERVAL_MINUTES)
        } else {
            default_billing_interval_minutes()
        };
        Duration::from_secs_f64(minutes * 60.0)
    }

    /// Validate and apply a new billing interval.
    pub fn set_billing_interval(&mut self, minutes: f64) -> KioskResult<()> {
        if !minutes.is_finite() || minutes <= 0.0 || minutes > MAX_INTERVAL_MINUTES {
            return Err(KioskError::InvalidSetting);
        }
        self.billing_interval_minutes = minutes;
        Ok(())
    }
}
