//! Timestamp parsing and formatting
//!
//! All timestamps are carried as UTC epoch milliseconds. Three textual
//! shapes appear in recordings: the compact filename timestring
//! (`YYYYMMDD_HHMMSS`), the `Recorded at` comment fields
//! (`HH:MM:SS DD/MM/YYYY`), and the ISO form used in GUANO bodies
//! (`YYYY-MM-DDTHH:MM:SS`).

use chrono::{DateTime, NaiveDateTime, NaiveTime, Utc};

/// Milliseconds per second
pub const MS_PER_SECOND: i64 = 1000;

fn utc(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse a compact `YYYYMMDD_HHMMSS` timestring to epoch milliseconds
pub fn parse_compact(s: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(s, "%Y%m%d_%H%M%S")
        .ok()
        .map(|dt| dt.and_utc().timestamp_millis())
}

/// Parse a legacy `HHMMSS` timestring to a time of day
pub fn parse_legacy_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H%M%S").ok()
}

/// Format epoch milliseconds as a compact `YYYYMMDD_HHMMSS` timestring
pub fn format_compact(ms: i64) -> String {
    utc(ms).format("%Y%m%d_%H%M%S").to_string()
}

/// Format epoch milliseconds as the comment form `HH:MM:SS DD/MM/YYYY`
pub fn format_comment(ms: i64) -> String {
    utc(ms).format("%H:%M:%S %d/%m/%Y").to_string()
}

/// Parse the comment form `HH:MM:SS DD/MM/YYYY` to epoch milliseconds
pub fn parse_comment(s: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(s, "%H:%M:%S %d/%m/%Y")
        .ok()
        .map(|dt| dt.and_utc().timestamp_millis())
}

/// Format epoch milliseconds as the ISO form `YYYY-MM-DDTHH:MM:SS`
pub fn format_iso(ms: i64) -> String {
    utc(ms).format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// Parse a CSV time cell `YYYY-MM-DD HH:MM:SS.mmm` to epoch milliseconds
pub fn parse_csv_time(s: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.3f")
        .ok()
        .map(|dt| dt.and_utc().timestamp_millis())
}

/// Format epoch milliseconds as a CSV time cell `YYYY-MM-DD HH:MM:SS.mmm`
pub fn format_csv_time(ms: i64) -> String {
    utc(ms).format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

/// Build epoch milliseconds from GPS log date/time fields
pub fn from_log_fields(
    day: u32,
    month: u32,
    year: i32,
    hour: u32,
    minute: u32,
    second: u32,
    millisecond: u32,
) -> Option<i64> {
    let date = chrono::NaiveDate::from_ymd_opt(year, month, day)?;
    let time = NaiveTime::from_hms_milli_opt(hour, minute, second, millisecond)?;
    Some(date.and_time(time).and_utc().timestamp_millis())
}
