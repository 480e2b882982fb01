//! Lightweight cron expression parser.
//! Supports: "MIN HOUR DOM MON DOW" (5-field, no seconds)
//! Wildcards: *, */N, N, comma lists. DOW: 0-6 (0 or 7 = Sunday).
//! Example: "0 8 * * 1" = every Monday at 8:00
//!
//! DOM and MON only accept `*`; push schedules are daily or weekly.
//! Times are naive wall-clock values in the host's local zone.

use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime, Timelike, Weekday};

/// Longest gap between two firings of a valid schedule (weekly) plus slack.
const SEARCH_HORIZON_MINUTES: i64 = 8 * 24 * 60;

/// A parsed cron trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    minutes: Vec<u32>,
    hours: Vec<u32>,
    /// Days of week, 0 = Sunday.
    weekdays: Vec<u32>,
}

impl CronSchedule {
    /// Parse a 5-field expression. Returns `None` (and logs) when invalid.
    pub fn parse(expression: &str) -> Option<Self> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            tracing::warn!(
                "Invalid cron expression: '{}' (need 5 fields: MIN HOUR DOM MON DOW)",
                expression
            );
            return None;
        }
        if parts[2] != "*" || parts[3] != "*" {
            tracing::warn!("Unsupported cron expression: '{}' (DOM/MON must be *)", expression);
            return None;
        }

        let minutes = parse_field(parts[0], 0, 59)?;
        let hours = parse_field(parts[1], 0, 23)?;
        let mut weekdays: Vec<u32> = parse_field(parts[4], 0, 7)?
            .into_iter()
            .map(|d| d % 7)
            .collect();
        weekdays.sort_unstable();
        weekdays.dedup();

        if minutes.is_empty() || hours.is_empty() || weekdays.is_empty() {
            return None;
        }

        Some(Self {
            expression: expression.to_string(),
            minutes,
            hours,
            weekdays,
        })
    }

    /// Every day at `time`.
    pub fn daily(time: NaiveTime) -> Self {
        Self {
            expression: format!("{} {} * * *", time.minute(), time.hour()),
            minutes: vec![time.minute()],
            hours: vec![time.hour()],
            weekdays: (0..7).collect(),
        }
    }

    /// Once a week on `weekday` at `time`.
    pub fn weekly(weekday: Weekday, time: NaiveTime) -> Self {
        let dow = weekday.num_days_from_sunday();
        Self {
            expression: format!("{} {} * * {}", time.minute(), time.hour(), dow),
            minutes: vec![time.minute()],
            hours: vec![time.hour()],
            weekdays: vec![dow],
        }
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Whether `at` (truncated to the minute) is a firing slot.
    pub fn matches(&self, at: NaiveDateTime) -> bool {
        self.minutes.contains(&at.minute())
            && self.hours.contains(&at.hour())
            && self.weekdays.contains(&at.weekday().num_days_from_sunday())
    }

    /// First firing slot strictly after `after`.
    pub fn next_after(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        let mut candidate = after + Duration::minutes(1);
        // Zero out seconds
        candidate = candidate.with_second(0).unwrap_or(candidate);
        candidate = candidate.with_nanosecond(0).unwrap_or(candidate);

        for _ in 0..SEARCH_HORIZON_MINUTES {
            if self.matches(candidate) {
                return Some(candidate);
            }
            candidate += Duration::minutes(1);
        }

        None
    }
}

/// Parse a cron field into a list of matching values.
fn parse_field(field: &str, min: u32, max: u32) -> Option<Vec<u32>> {
    if field == "*" {
        return Some((min..=max).collect());
    }

    // */N — every N
    if let Some(step) = field.strip_prefix("*/") {
        let n: u32 = step.parse().ok()?;
        if n == 0 {
            return None;
        }
        return Some((min..=max).step_by(n as usize).collect());
    }

    // Comma-separated: "0,15,30,45"
    if field.contains(',') {
        let vals: Result<Vec<u32>, _> = field.split(',').map(|s| s.trim().parse()).collect();
        return vals
            .ok()
            .map(|v| v.into_iter().filter(|x| *x >= min && *x <= max).collect());
    }

    // Single number
    let n: u32 = field.parse().ok()?;
    if n >= min && n <= max {
        Some(vec![n])
    } else {
        None
    }
}
