//! # Temporal Type Conversion Module
//!
//! Formatting and parsing of `chrono` values for each backend.
//!
//! ## Storage Formats
//!
//! | Dialect    | `DateTime<Utc>`                | `NaiveDateTime`              |
//! |------------|--------------------------------|------------------------------|
//! | PostgreSQL | RFC 3339                        | `%Y-%m-%d %H:%M:%S%.6f`      |
//! | SQLite     | RFC 3339                        | `%Y-%m-%d %H:%M:%S%.f`       |
//! | MySQL      | `%Y-%m-%d %H:%M:%S%.6f` (UTC)   | `%Y-%m-%d %H:%M:%S%.6f`      |
//! | SQL Server | `%Y-%m-%d %H:%M:%S%.6f +00:00`  | `%Y-%m-%d %H:%M:%S%.3f`      |
//! | Oracle     | `%Y-%m-%d %H:%M:%S%.6f`         | `%Y-%m-%d %H:%M:%S%.6f`      |
//! | Firebird   | `%Y-%m-%d %H:%M:%S%.3f`         | `%Y-%m-%d %H:%M:%S%.3f`      |
//!
//! Parsing is lenient: every format above, plus the `T`-separated ISO forms,
//! is accepted when reading values back.

// ============================================================================
// External Crate Imports
// ============================================================================

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

// ============================================================================
// Internal Crate Imports
// ============================================================================

use crate::{Error, dialect::DialectKind};

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

// ============================================================================
// Formatting
// ============================================================================

/// Formats a UTC timestamp the way `kind` stores it.
pub fn format_datetime_for(value: &DateTime<Utc>, kind: DialectKind) -> String {
    match kind {
        DialectKind::Postgres | DialectKind::Sqlite => value.to_rfc3339(),
        DialectKind::MySql | DialectKind::Oracle => value.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
        DialectKind::SqlServer => value.format("%Y-%m-%d %H:%M:%S%.6f +00:00").to_string(),
        DialectKind::Firebird => value.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
    }
}

/// Formats a timestamp without zone the way `kind` stores it.
pub fn format_naive_datetime_for(value: &NaiveDateTime, kind: DialectKind) -> String {
    match kind {
        DialectKind::Postgres | DialectKind::MySql | DialectKind::Oracle => {
            value.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
        }
        DialectKind::Sqlite => value.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
        DialectKind::SqlServer => value.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        DialectKind::Firebird => value.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
    }
}

pub fn format_date(value: &NaiveDate) -> String {
    value.format("%Y-%m-%d").to_string()
}

pub fn format_time(value: &NaiveTime) -> String {
    value.format("%H:%M:%S%.6f").to_string()
}

// ============================================================================
// Parsing
// ============================================================================

/// Parses a timestamp with zone, falling back to naive forms read as UTC.
pub fn parse_datetime_utc(value: &str) -> Result<DateTime<Utc>, Error> {
    let trimmed = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f %:z") {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Ok(parsed.with_timezone(&Utc));
    }
    parse_naive_datetime(trimmed)
        .map(|naive| naive.and_utc())
        .map_err(|_| Error::Conversion(format!("Failed to parse DateTime<Utc>: {}", value)))
}

pub fn parse_naive_datetime(value: &str) -> Result<NaiveDateTime, Error> {
    let trimmed = value.trim();
    for format in NAIVE_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(parsed);
        }
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.naive_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN));
    }
    Err(Error::Conversion(format!("Failed to parse NaiveDateTime: {}", value)))
}

pub fn parse_naive_date(value: &str) -> Result<NaiveDate, Error> {
    let trimmed = value.trim();
    if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(parsed);
    }
    parse_naive_datetime(trimmed)
        .map(|dt| dt.date())
        .map_err(|_| Error::Conversion(format!("Failed to parse NaiveDate: {}", value)))
}

pub fn parse_naive_time(value: &str) -> Result<NaiveTime, Error> {
    let trimmed = value.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M"))
        .map_err(|e| Error::Conversion(format!("Failed to parse NaiveTime: {}", e)))
}
