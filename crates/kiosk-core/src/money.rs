//! Monetary rounding.
//!
//! Balances are kept as `f64` and snapped to cents after every mutation so
//! repeated billing ticks do not accumulate floating point drift.

/// Round a monetary amount to 2 decimal places.
pub fn round2(amount: f64) -> f64 {
    let rounded = (amount * 100.0).round() / 100.0;
    // Normalise -0.0 so it serializes as 0.
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

/// Cost of one billing interval at `rate_per_hour`.
pub fn prorated_cost(rate_per_hour: f64, interval_secs: f64) -> f64 {
    rate_per_hour * interval_secs / 3600.0
}
