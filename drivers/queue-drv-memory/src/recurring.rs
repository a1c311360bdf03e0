//! Recurring job definitions and next-firing computation.

use chrono::{DateTime, Utc};
use queue_api::Schedule;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RecurringDef {
    pub data: Value,
    pub priority: i64,
    pub schedule: Schedule,
    pub start_delay: Duration,
    pub enabled: bool,
}

/// Cron patterns here are standard 5-field (minute, hour, day-of-month,
/// month, day-of-week); the `cron` crate parses the
/// Quartz-style 6-field form with a leading seconds field. A fixed
/// `0` seconds field bridges the two without changing firing
/// semantics -- every match still lands on a whole minute.
fn compile(pattern: &str) -> Result<cron::Schedule, cron::error::Error> {
    cron::Schedule::from_str(&format!("0 {pattern}"))
}

/// Computes the next firing instant strictly after `now`. Returns
/// `None` for an unparsable cron pattern -- the caller logs and does
/// not fire.
pub fn next_fire(schedule: &Schedule, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match schedule {
        Schedule::Interval(interval) => {
            chrono::Duration::from_std(*interval).ok().map(|d| now + d)
        }
        Schedule::Cron(pattern) => match compile(pattern) {
            Ok(parsed) => parsed.after(&now).next(),
            Err(e) => {
                tracing::error!(pattern, error = %e, "invalid cron pattern");
                None
            }
        },
    }
}

/// Validates a schedule at definition time (`scheduleRecurring`),
/// independent of computing the next firing. An interval of zero or
/// an unparsable cron pattern is rejected eagerly rather than only
/// discovered the first time `next_fire` is called.
pub fn validate(schedule: &Schedule) -> Result<(), String> {
    match schedule {
        Schedule::Interval(d) if d.is_zero() => {
            Err("intervalSeconds must be greater than zero".to_string())
        }
        Schedule::Interval(_) => Ok(()),
        Schedule::Cron(pattern) => compile(pattern)
            .map(|_| ())
            .map_err(|e| format!("invalid cron pattern '{pattern}': {e}")),
    }
}
