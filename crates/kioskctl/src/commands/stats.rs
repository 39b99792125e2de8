//! `kioskctl stats` — revenue and usage totals.

use anyhow::{Context, Result};
use chrono::Local;
use kiosk_core::{compute_stats, LedgerStore, Period};

pub fn run(store: &LedgerStore, period: &str, json: bool) -> Result<()> {
    let (ledger, _) = store.load().context("failed to load ledger")?;
    let period = Period::parse_lenient(Some(period));
    let stats = compute_stats(&ledger.session_logs, period, Local::now());

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let label = match stats.period {
        Period::Today => "today",
        Period::Week => "this week",
        Period::All => "all time",
    };
    println!("Sessions ({label}): {}", stats.total_sessions);
    println!("Minutes used:      {}", stats.total_duration);
    println!("Revenue:           {:.2}", stats.total_revenue);
    Ok(())
}
