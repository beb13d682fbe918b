use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// When a delayed job should first become due.
///
/// Deserializes untagged, so an HTTP body may carry `"when": 30`,
/// `"when": "in 5 minutes"` or `"when": "2026-01-01T09:00:00Z"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunAt {
    Timestamp(DateTime<Utc>),
    /// Seconds from now.
    Seconds(i64),
    Phrase(String),
}

impl RunAt {
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        match self {
            RunAt::Timestamp(at) => Ok(*at),
            RunAt::Seconds(secs) => offset_seconds(now, *secs),
            RunAt::Phrase(phrase) => resolve_phrase(phrase, now),
        }
    }
}

impl From<DateTime<Utc>> for RunAt {
    fn from(at: DateTime<Utc>) -> Self {
        RunAt::Timestamp(at)
    }
}

impl From<i64> for RunAt {
    fn from(secs: i64) -> Self {
        RunAt::Seconds(secs)
    }
}

impl From<&str> for RunAt {
    fn from(phrase: &str) -> Self {
        RunAt::Phrase(phrase.to_string())
    }
}

impl From<String> for RunAt {
    fn from(phrase: String) -> Self {
        RunAt::Phrase(phrase)
    }
}

fn offset(now: DateTime<Utc>, by: Duration) -> Result<DateTime<Utc>> {
    now.checked_add_signed(by)
        .ok_or_else(|| AppError::InvalidSchedule("scheduled time is out of range".to_string()))
}

fn offset_seconds(now: DateTime<Utc>, secs: i64) -> Result<DateTime<Utc>> {
    let by = Duration::try_seconds(secs)
        .ok_or_else(|| AppError::InvalidSchedule(format!("{} seconds is out of range", secs)))?;
    offset(now, by)
}

fn resolve_phrase(phrase: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let trimmed = phrase.trim();

    if let Some(rest) = strip_prefix_ignore_case(trimmed, "in ") {
        return offset(now, parse_duration_phrase(rest)?);
    }

    if let Ok(secs) = trimmed.parse::<i64>() {
        return offset_seconds(now, secs);
    }

    parse_absolute(trimmed, now)
        .ok_or_else(|| AppError::InvalidSchedule(format!("cannot parse time '{}'", phrase)))
}

fn parse_absolute(value: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if value.eq_ignore_ascii_case("now") {
        return Some(now);
    }
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Some(at.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    let head = value.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &value[prefix.len()..])
}

/// Parse "5 minutes", "an hour", "every 2 days" into a duration.
fn parse_duration_phrase(phrase: &str) -> Result<Duration> {
    let invalid = || AppError::InvalidSchedule(format!("cannot parse interval '{}'", phrase));

    let lowered = phrase.trim().to_ascii_lowercase();
    let body = lowered.strip_prefix("every ").unwrap_or(&lowered).trim();

    let mut parts = body.split_whitespace();
    let (count, unit) = match (parts.next(), parts.next(), parts.next()) {
        (Some(count), Some(unit), None) => (count, unit),
        // "every hour"
        (Some(unit), None, None) if !unit.starts_with(|c: char| c.is_ascii_digit()) => ("1", unit),
        _ => return Err(invalid()),
    };

    let count: i64 = match count {
        "a" | "an" | "one" => 1,
        digits => digits.parse().map_err(|_| invalid())?,
    };

    let unit_secs = match unit {
        "second" | "seconds" | "sec" | "secs" | "s" => 1,
        "minute" | "minutes" | "min" | "mins" | "m" => 60,
        "hour" | "hours" | "hr" | "hrs" | "h" => 60 * 60,
        "day" | "days" | "d" => 24 * 60 * 60,
        "week" | "weeks" | "w" => 7 * 24 * 60 * 60,
        _ => return Err(invalid()),
    };

    count
        .checked_mul(unit_secs)
        .and_then(Duration::try_seconds)
        .ok_or_else(invalid)
}

/// Parse a recurring interval. Zero and negative intervals are rejected.
pub fn parse_interval(interval: &str) -> Result<Duration> {
    let duration = parse_duration_phrase(interval)?;
    if duration <= Duration::zero() {
        return Err(AppError::InvalidSchedule(format!(
            "interval '{}' must be positive",
            interval
        )));
    }
    Ok(duration)
}

/// Next run of a recurring job: one interval after the previous scheduled
/// time, skipped forward by whole periods if that is already in the past.
///
/// `None` when the next run falls outside the representable time range.
pub fn next_recurring_run(
    previous: DateTime<Utc>,
    interval: Duration,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let mut next = previous.checked_add_signed(interval)?;
    if next <= now {
        let behind = (now - next).num_milliseconds();
        let step = interval.num_milliseconds().max(1);
        let skip = (behind / step).checked_add(1)?.checked_mul(step)?;
        next = next.checked_add_signed(Duration::try_milliseconds(skip)?)?;
    }
    Some(next)
}

/// Current time truncated to millisecond precision, the resolution MongoDB
/// stores. Lock comparisons rely on the stored value round-tripping exactly.
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}
