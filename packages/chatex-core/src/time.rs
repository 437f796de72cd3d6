//! Epoch conversion for backup timestamps.
//!
//! Android databases store Unix time (seconds in very old rows,
//! milliseconds everywhere else). iOS stores Core Data time: seconds,
//! possibly fractional, since 2001-01-01T00:00:00Z. Binary plist dates use
//! the same Apple epoch.

use chrono::{DateTime, FixedOffset, Offset, TimeZone, Utc};

/// Seconds between the Unix epoch and 2001-01-01T00:00:00Z
pub const APPLE_EPOCH_OFFSET: i64 = 978_307_200;

/// Values above this are taken to be milliseconds
const MILLIS_THRESHOLD: i64 = 9_999_999_999;

/// Convert an Android `timestamp` column to UTC.
pub fn from_android(raw: i64) -> Option<DateTime<Utc>> {
    if raw > MILLIS_THRESHOLD {
        Utc.timestamp_millis_opt(raw).single()
    } else {
        Utc.timestamp_opt(raw, 0).single()
    }
}

/// Convert seconds since the Apple epoch to UTC.
pub fn from_apple(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let millis = (seconds * 1000.0).round();
    if millis.abs() > i64::MAX as f64 / 2.0 {
        return None;
    }
    let unix_millis = (millis as i64).checked_add(APPLE_EPOCH_OFFSET * 1000)?;
    Utc.timestamp_millis_opt(unix_millis).single()
}

/// Attach the configured offset (UTC when `None`).
pub fn localize(instant: DateTime<Utc>, offset_minutes: Option<i32>) -> DateTime<FixedOffset> {
    let offset = offset_minutes
        .and_then(|m| FixedOffset::east_opt(m * 60))
        .unwrap_or_else(utc_offset);
    instant.with_timezone(&offset)
}

/// The Unix epoch, used when a row carries no usable timestamp.
pub fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::default()
}

fn utc_offset() -> FixedOffset {
    Utc.fix()
}
