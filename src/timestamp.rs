//! Wall-clock timestamps for chat lines.

use chrono::{DateTime, Local, TimeZone};

/// Second-resolution format used on every chat and lifecycle line.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current local time as `YYYY-MM-DD HH:MM:SS`.
pub fn now() -> String {
    format(&Local::now())
}

/// Format any zoned time in the chat timestamp layout.
pub fn format<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    at.format(TIMESTAMP_FORMAT).to_string()
}
