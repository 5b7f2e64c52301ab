//! Shared primitive types used across the pipeline.

use chrono::NaiveDateTime;

/// Canonical on-disk timestamp format. Matches what SQLite's `datetime()`
/// emits, so text comparison in SQL equals chronological comparison.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A wall-clock or logical timestamp. Always UTC, never zoned.
pub type Timestamp = NaiveDateTime;

/// The canonical run identifier.
pub type RunId = String;

/// Upstream row identifiers (applications, loans, cycles, customers).
pub type RowId = i64;

pub fn format_ts(ts: &Timestamp) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a stored timestamp. Date-only values are read as midnight.
pub fn parse_ts(raw: &str) -> Option<Timestamp> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .ok()
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Current UTC wall-clock time, truncated to the storage precision.
pub fn utc_now() -> Timestamp {
    let now = chrono::Utc::now().naive_utc();
    parse_ts(&format_ts(&now)).unwrap_or(now)
}
