//! Permissive date and time parsing.
//!
//! Clients send dates in many shapes (`1900-01-02`, `2nd Jan 1900`,
//! `January 2, 1900 10:00`). Strict ISO-8601 formats are tried first, then the
//! string is normalised (ordinal suffixes and commas removed) and matched
//! against a list of common human formats.

use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;

static ORDINAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})(st|nd|rd|th)\b").expect("ordinal pattern compiles")
});

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d %B %Y",
    "%B %d %Y",
    "%A %d %B %Y",
    "%A %B %d %Y",
    "%Y %B %d",
    "%d-%B-%Y",
    "%m/%d/%Y",
    "%d.%m.%Y",
    "%Y%m%d",
];

const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M", "%I:%M %p", "%I:%M:%S %p", "%I %p"];

/// Server-side clock markers accepted in place of a literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockMarker {
    CurrentDate,
    CurrentTime,
    CurrentTimestamp,
}

impl ClockMarker {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "CURRENT_DATE" => Some(Self::CurrentDate),
            "CURRENT_TIME" => Some(Self::CurrentTime),
            "CURRENT_TIMESTAMP" => Some(Self::CurrentTimestamp),
            _ => None,
        }
    }

    /// The SQL keyword evaluated by the database.
    pub fn sql(self) -> &'static str {
        match self {
            Self::CurrentDate => "CURRENT_DATE",
            Self::CurrentTime => "CURRENT_TIME",
            Self::CurrentTimestamp => "CURRENT_TIMESTAMP",
        }
    }
}

fn normalise(value: &str) -> String {
    let stripped = ORDINAL.replace_all(value.trim(), "$1");
    stripped
        .replace(',', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_free_date(value: &str) -> Option<NaiveDate> {
    let value = normalise(value);
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(&value, format).ok())
}

fn parse_free_datetime(value: &str) -> Option<NaiveDateTime> {
    let value = normalise(value);
    // Try every "<date> <time>" split from the right.
    let words: Vec<&str> = value.split(' ').collect();
    for split in (1..words.len()).rev() {
        let (date, time) = (words[..split].join(" "), words[split..].join(" "));
        let Some(date) = parse_free_date(&date) else {
            continue;
        };
        if let Some(time) = TIME_FORMATS
            .iter()
            .find_map(|format| NaiveTime::parse_from_str(&time, format).ok())
        {
            return Some(date.and_time(time));
        }
    }
    parse_free_date(&value).and_then(|date| date.and_hms_opt(0, 0, 0))
}

/// Parse a calendar date, accepting full timestamps by truncation.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .ok()
        .or_else(|| parse_datetime(value).map(|dt| dt.date()))
        .or_else(|| parse_free_date(value))
}

/// Parse a timestamp without offset. Offsets, when present, are dropped
/// after conversion to the local wall clock of that offset.
pub fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    let trimmed = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.naive_local());
    }
    [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ]
    .iter()
    .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
    .or_else(|| parse_free_datetime(trimmed))
}

/// Parse a timestamp with an offset; naive input is taken as UTC.
pub fn parse_datetime_tz(value: &str) -> Option<DateTime<FixedOffset>> {
    let trimmed = value.trim();
    DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .or_else(|| DateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f%:z").ok())
        .or_else(|| parse_datetime(trimmed).map(|dt| dt.and_utc().fixed_offset()))
}

pub fn parse_time(value: &str) -> Option<NaiveTime> {
    let trimmed = value.trim();
    TIME_FORMATS
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(trimmed, format).ok())
        .or_else(|| parse_datetime(trimmed).map(|dt| dt.time()))
}
