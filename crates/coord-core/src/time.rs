//! Timestamp helpers. All persisted timestamps are ISO-8601 strings in UTC.

use chrono::{DateTime, SecondsFormat, Utc};

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Current time as the ISO-8601 string persisted in state files.
pub fn now_iso() -> String {
    to_iso(Utc::now())
}

pub fn to_iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a persisted timestamp. Session files are written by external
/// hooks, so tolerate any RFC 3339 offset.
pub fn parse_iso(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Age of `value` relative to `now`, in whole seconds. `None` when the
/// string does not parse. Future timestamps clamp to zero.
pub fn age_seconds(value: &str, now: DateTime<Utc>) -> Option<i64> {
    parse_iso(value).map(|ts| (now - ts).num_seconds().max(0))
}
