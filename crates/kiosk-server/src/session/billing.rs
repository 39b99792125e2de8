//! Metered billing: one recurring tick per billed session.

use crate::channel::ConnId;
use crate::hub::Hub;
use kiosk_core::money::{prorated_cost, round2};
use kiosk_core::User;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

/// Result of applying one tick to an account.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Charge {
    /// Balance decremented and still positive.
    Charged { balance: f64, session_cost: f64 },
    /// Balance ran out on this tick and was clamped to zero.
    Exhausted { session_cost: f64 },
}

/// Whether the meter should keep running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Stop,
}

/// Charge `user` for one `interval` at their current rate.
///
/// `accrued` is the session's running total and grows by exactly the amount
/// taken from the balance, so the final log entry matches the decrements.
pub fn apply_tick(user: &mut User, accrued: &mut f64, interval: Duration) -> Charge {
    let cost = prorated_cost(user.rate, interval.as_secs_f64());
    let before = user.balance.max(0.0);
    let after = round2(before - cost);
    if after > 0.0 {
        user.balance = after;
        *accrued += before - after;
        Charge::Charged {
            balance: after,
            session_cost: round2(*accrued),
        }
    } else {
        user.balance = 0.0;
        *accrued += before;
        Charge::Exhausted {
            session_cost: round2(*accrued),
        }
    }
}

/// Spawn the recurring task that bills `conn_id` every `interval`.
///
/// The first tick fires one full interval after admission. The task stops on
/// its own when the hub reports the session gone; retire also aborts it.
pub fn spawn_meter(hub: Arc<Hub>, conn_id: ConnId, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if hub.billing_tick(conn_id).await == TickOutcome::Stop {
                break;
            }
        }
        debug!(conn_id, "meter stopped");
    })
}
