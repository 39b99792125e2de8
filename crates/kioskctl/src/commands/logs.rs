//! `kioskctl logs` — recent session history.

use anyhow::{Context, Result};
use chrono::Local;
use kiosk_core::{LedgerStore, SessionLogEntry};

pub fn run(store: &LedgerStore, limit: usize, json: bool) -> Result<()> {
    let (ledger, _) = store.load().context("failed to load ledger")?;
    let entries = ledger.recent_logs(limit);

    if json {
        println!("{}", serde_json::to_string_pretty(entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("No sessions recorded.");
        return Ok(());
    }

    println!(
        "{:<24} {:<17} {:<17} {:>6} {:>9}",
        "USER", "START", "END", "MIN", "COST"
    );
    // Oldest first so the newest ends up next to the prompt.
    for entry in entries.iter().rev() {
        println!("{}", format_row(entry));
    }
    Ok(())
}

fn format_row(entry: &SessionLogEntry) -> String {
    let fmt = "%Y-%m-%d %H:%M";
    format!(
        "{:<24} {:<17} {:<17} {:>6} {:>9.2}",
        entry.username,
        entry.start_time.with_timezone(&Local).format(fmt),
        entry.end_time.with_timezone(&Local).format(fmt),
        entry.duration,
        entry.cost
    )
}
