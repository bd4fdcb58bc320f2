//! Small shared helpers: identifiers, timestamps and millisecond options.

use chrono::{DateTime, SecondsFormat, Utc};
use std::time::Duration;
use uuid::Uuid;

/// Generates a new random identifier (UUID v4, hyphenated).
#[must_use]
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Returns the current UTC time.
#[must_use]
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Formats a timestamp as RFC 3339 with millisecond precision.
#[must_use]
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Converts a millisecond option to a duration, clamping negatives to zero.
#[must_use]
pub fn millis(ms: i64) -> Duration {
    Duration::from_millis(u64::try_from(ms).unwrap_or(0))
}

/// Interprets a count option where any negative value means "unbounded".
#[must_use]
pub fn bound(value: i64) -> Option<u64> {
    u64::try_from(value).ok()
}
