//! Recurring-job schedules and the details returned about them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::job::JobId;

/// A recurring definition fires on exactly one of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Schedule {
    /// Fire every `interval` from the previous firing.
    Interval(#[serde(with = "duration_secs")] Duration),

    /// Fire at instants matching a standard 5-field cron pattern
    /// (minute, hour, day-of-month, month, day-of-week), in UTC.
    Cron(String),
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

/// Snapshot of a live recurring definition, returned by
/// `get_recurring_job_details` and used to migrate definitions across
/// a backend switch.
#[derive(Debug, Clone)]
pub struct RecurringJobDetails<T> {
    pub job_id: JobId,
    pub data: T,
    pub priority: i64,
    pub schedule: Schedule,
    pub start_delay: Duration,
    pub next_run_at: Option<DateTime<Utc>>,
}
