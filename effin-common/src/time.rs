//! Wall-clock helpers
//!
//! Audit entries and alerts carry timestamps as float seconds since the Unix
//! epoch, which is what downstream ledger readers expect.

use chrono::{DateTime, TimeZone, Utc};

/// Current time as float seconds since the Unix epoch
pub fn now_seconds() -> f64 {
    to_seconds(Utc::now())
}

/// Convert a UTC timestamp into float seconds since the Unix epoch
pub fn to_seconds(ts: DateTime<Utc>) -> f64 {
    ts.timestamp_micros() as f64 / 1_000_000.0
}

/// Convert float seconds back into a UTC timestamp
///
/// Returns `None` for non-finite or out-of-range values.
pub fn from_seconds(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let micros = (seconds * 1_000_000.0).round();
    if micros < i64::MIN as f64 || micros > i64::MAX as f64 {
        return None;
    }
    Utc.timestamp_micros(micros as i64).single()
}
