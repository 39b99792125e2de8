//! `kioskctl user add|passwd|list` — account management.

use anyhow::{bail, Context, Result};
use kiosk_core::identity::{password_len_ok, validate_username, MAX_PASSWORD_LEN};
use kiosk_core::password::hash_password;
use kiosk_core::{round2, LedgerStore, Role, User};
use tracing::info;

/// Create an account and save the ledger.
pub fn add(
    store: &LedgerStore,
    name: &str,
    admin: bool,
    rate: f64,
    balance: f64,
    password: Option<String>,
) -> Result<()> {
    validate_username(name)?;
    if !rate.is_finite() || rate < 0.0 {
        bail!("rate must be a non-negative number");
    }
    if !balance.is_finite() || balance < 0.0 {
        bail!("balance must be a non-negative number");
    }

    let (mut ledger, _) = store.load().context("failed to load ledger")?;
    if ledger.user(name).is_some() {
        bail!("user '{name}' already exists");
    }

    let password = read_password(password)?;
    let mut user = User::new(hash_password(&password)?, rate);
    user.balance = round2(balance);
    if admin {
        user.role = Role::Admin;
    }
    ledger.users.insert(name.to_string(), user);
    store.save_ledger(&ledger).context("failed to save ledger")?;

    info!(username = name, admin, "user created");
    let kind = if admin { "administrator" } else { "user" };
    println!("Created {kind} '{name}'");
    Ok(())
}

/// Replace an account's password.
pub fn passwd(store: &LedgerStore, name: &str, password: Option<String>) -> Result<()> {
    let (mut ledger, _) = store.load().context("failed to load ledger")?;
    if ledger.user(name).is_none() {
        bail!("user '{name}' not found");
    }

    let hash = hash_password(&read_password(password)?)?;
    if let Some(user) = ledger.user_mut(name) {
        user.password_hash = hash;
    }
    store.save_ledger(&ledger).context("failed to save ledger")?;

    info!(username = name, "password changed");
    println!("Password updated for '{name}'");
    Ok(())
}

/// Print every account as a table.
pub fn list(store: &LedgerStore) -> Result<()> {
    let (ledger, _) = store.load().context("failed to load ledger")?;
    if ledger.users.is_empty() {
        println!("No users. Run `kioskctl user add <name> --admin` to create one.");
        return Ok(());
    }

    println!("{:<24} {:<6} {:>10} {:>8}", "NAME", "ROLE", "BALANCE", "RATE");
    for (name, user) in &ledger.users {
        let role = if user.is_admin() { "admin" } else { "user" };
        println!(
            "{:<24} {:<6} {:>10.2} {:>8.2}",
            name, role, user.balance, user.rate
        );
    }
    println!("\n{} user(s).", ledger.users.len());
    Ok(())
}

/// Use the flag value, or prompt without echo.
fn read_password(given: Option<String>) -> Result<String> {
    let password = match given {
        Some(p) => p,
        None => dialoguer::Password::new()
            .with_prompt("Password")
            .with_confirmation("Confirm password", "Passwords do not match")
            .interact()
            .context("failed to read password")?,
    };
    if !password_len_ok(&password) {
        bail!("password must be 1 to {MAX_PASSWORD_LEN} characters");
    }
    Ok(password)
}
