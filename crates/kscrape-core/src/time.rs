//! Parsing of window boundaries.
//!
//! Accepts either an RFC 3339 timestamp (`2019-01-02T12:00:00Z`) or a
//! relative duration in the past: `15s`, `-60m`, `-2 h`, `4 m ago`.

use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use std::sync::OnceLock;

fn relative_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^-?([0-9]+) ?([smhd])(?: ago)?$").expect("relative time pattern is valid")
    })
}

/// Parse a window boundary relative to `now`.
///
/// Relative values always point into the past, the sign is optional.
pub fn parse_time(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let input = input.trim();

    if let Some(captures) = relative_pattern().captures(input) {
        let amount: i64 = captures[1]
            .parse()
            .map_err(|_| Error::Config(format!("time amount out of range: {input}")))?;
        let ago = match &captures[2] {
            "s" => Duration::try_seconds(amount),
            "m" => Duration::try_minutes(amount),
            "h" => Duration::try_hours(amount),
            _ => Duration::try_days(amount),
        }
        .ok_or_else(|| Error::Config(format!("time amount out of range: {input}")))?;

        return now
            .checked_sub_signed(ago)
            .ok_or_else(|| Error::Config(format!("time out of range: {input}")));
    }

    DateTime::parse_from_rfc3339(input)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Config(format!("could not parse time '{input}': {e}")))
}
