//! Time arithmetic on catalog timestamps.
//!
//! Catalog times are [`DateTime<Utc>`] with microsecond resolution. Residuals
//! and window offsets are handled as fractional seconds.

use chrono::{DateTime, Duration, Utc};

/// Signed difference `later - earlier` in fractional seconds.
#[allow(clippy::cast_precision_loss)]
pub fn seconds_between(later: DateTime<Utc>, earlier: DateTime<Utc>) -> f64 {
    let delta = later.signed_duration_since(earlier);
    delta.num_microseconds().map_or_else(
        || delta.num_milliseconds() as f64 / 1_000.0,
        |us| us as f64 / 1_000_000.0,
    )
}

/// Shift a timestamp by a fractional number of seconds, rounded to the
/// nearest microsecond.
#[allow(clippy::cast_possible_truncation)]
pub fn offset_seconds(time: DateTime<Utc>, seconds: f64) -> DateTime<Utc> {
    let micros = (seconds * 1_000_000.0).round() as i64;
    time.checked_add_signed(Duration::microseconds(micros))
        .unwrap_or(time)
}

/// Timestamp prefix used in generated pick IDs: `YYYYMMDD.HHMMSS.ff`, with
/// the fractional part truncated to hundredths of a second.
pub fn pick_id_timestamp(time: DateTime<Utc>) -> String {
    let hundredths = time.timestamp_subsec_micros() / 10_000;
    format!("{}.{hundredths:02}", time.format("%Y%m%d.%H%M%S"))
}
