//! Revenue and usage rollups over the session history.

use crate::ledger::SessionLogEntry;
use crate::money::round2;
use chrono::{DateTime, Datelike, Days, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Reporting window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    /// Since local midnight.
    #[default]
    Today,
    /// Since local midnight of the most recent Monday.
    Week,
    /// Everything retained.
    All,
}

impl Period {
    /// Parse a query value; anything unrecognised means [`Period::Today`].
    pub fn parse_lenient(value: Option<&str>) -> Self {
        match value.map(str::to_ascii_lowercase).as_deref() {
            Some("week") => Period::Week,
            Some("all") => Period::All,
            _ => Period::Today,
        }
    }
}

/// Aggregate over one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub period: Period,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub total_sessions: usize,
    /// Minutes.
    pub total_duration: i64,
    pub total_revenue: f64,
}

/// Roll up every entry whose end time falls inside the window ending at `now`.
///
/// Day boundaries are computed in `now`'s timezone.
pub fn compute_stats<Tz: TimeZone>(
    logs: &[SessionLogEntry],
    period: Period,
    now: DateTime<Tz>,
) -> Stats {
    let start = window_start(period, &now);
    let mut total_sessions = 0;
    let mut total_duration = 0;
    let mut total_revenue = 0.0;
    for entry in logs.iter().filter(|e| e.end_time >= start) {
        total_sessions += 1;
        total_duration += entry.duration;
        total_revenue += entry.cost;
    }
    Stats {
        period,
        start_date: start,
        end_date: now.with_timezone(&Utc),
        total_sessions,
        total_duration,
        total_revenue: round2(total_revenue),
    }
}

fn window_start<Tz: TimeZone>(period: Period, now: &DateTime<Tz>) -> DateTime<Utc> {
    let today = now.date_naive();
    let day = match period {
        Period::All => return DateTime::<Utc>::UNIX_EPOCH,
        Period::Today => today,
        Period::Week => {
            let back = u64::from(today.weekday().num_days_from_monday());
            today.checked_sub_days(Days::new(back)).unwrap_or(today)
        }
    };
    let midnight = day.and_time(NaiveTime::MIN);
    now.timezone()
        .from_local_datetime(&midnight)
        .earliest()
        .map(|d| d.with_timezone(&Utc))
        // Midnight skipped by a DST jump: fall back to the UTC reading.
        .unwrap_or_else(|| Utc.from_utc_datetime(&midnight))
}
