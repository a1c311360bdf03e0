//! Job identity and the payload handed to a consumer's handler.

use chrono::{DateTime, Utc};
use std::sync::Arc;

/// A job's identity within a queue. Cheap to clone since it's shared
/// across the pending list, every consumer group's `processed` set,
/// and any recurring-job snapshot that's in flight during a backend
/// switch.
pub type JobId = Arc<str>;

/// Builds the derived-job id for a recurring definition's firing at
/// `fired_at`. This is the sole join between a derived job and its
/// parent recurring definition (see `is_derived_from`).
pub fn derived_job_id(recurring_job_id: &str, fired_at: DateTime<Utc>) -> JobId {
    Arc::from(format!("{recurring_job_id}:{}", fired_at.timestamp_millis()).as_str())
}

/// Returns the recurring job id a derived job id belongs to, if any.
/// Splits on the last colon, so it is only correct when the caller's
/// recurring job ids don't themselves contain colons. Callers that
/// hold the set of live recurring job ids (the dispatcher) should
/// prefer `is_derived_from`, which matches against a known id and has
/// no such restriction.
pub fn parent_recurring_id(job_id: &str) -> Option<&str> {
    job_id.rsplit_once(':').map(|(parent, _)| parent)
}

/// True if `job_id` is a derived firing of `recurring_job_id`.
pub fn is_derived_from(job_id: &str, recurring_job_id: &str) -> bool {
    job_id
        .strip_prefix(recurring_job_id)
        .and_then(|rest| rest.strip_prefix(':'))
        .is_some()
}

/// What a consumer's handler receives for one delivery attempt.
#[derive(Debug, Clone)]
pub struct JobContext<T> {
    pub id: JobId,
    pub data: T,
    pub priority: i64,
    pub enqueued_at: DateTime<Utc>,
    pub attempts: u32,
}

/// The wire-level context, payload erased to JSON. Drivers operate
/// exclusively on this type; `queue-manager`'s `QueueProxy<T>`
/// deserializes into a caller's `T` before invoking their handler.
pub type RawContext = JobContext<serde_json::Value>;
