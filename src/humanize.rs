//! Pure formatting helpers used by the page view-models.

use chrono::{DateTime, Utc};

/// "just now", "5 minutes ago", "1 day ago", ... Timestamps in the future
/// collapse to "just now".
pub fn relative_age(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(then);
    if elapsed.num_seconds() < 60 {
        return "just now".to_string();
    }

    let days = elapsed.num_days();
    let (count, unit, units) = if elapsed.num_minutes() < 60 {
        (elapsed.num_minutes(), "minute", "minutes")
    } else if elapsed.num_hours() < 24 {
        (elapsed.num_hours(), "hour", "hours")
    } else if days < 7 {
        (days, "day", "days")
    } else if days < 30 {
        (elapsed.num_weeks(), "week", "weeks")
    } else if days < 365 {
        (days / 30, "month", "months")
    } else {
        (days / 365, "year", "years")
    };
    format!("{} ago", pluralize(count, unit, units))
}

/// Same as [`relative_age`] for a unix timestamp.
pub fn relative_age_from_unix(timestamp: i64, now: DateTime<Utc>) -> String {
    match DateTime::from_timestamp(timestamp, 0) {
        Some(then) => relative_age(then, now),
        None => "a long time ago".to_string(),
    }
}

/// `1 video`, `2 videos`, `1,204 views`.
pub fn pluralize(count: i64, singular: &str, plural: &str) -> String {
    let noun = if count == 1 { singular } else { plural };
    format!("{} {noun}", group_digits(count))
}

pub fn group_digits(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if value < 0 {
        grouped.push('-');
    }
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

/// `4:05`, `1:02:03`.
pub fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes}:{secs:02}")
    }
}

/// Calendar date of a unix timestamp, e.g. `Mar 4, 2021`.
pub fn format_date(timestamp: i64) -> String {
    DateTime::from_timestamp(timestamp, 0)
        .map(|date| date.format("%b %-d, %Y").to_string())
        .unwrap_or_default()
}
