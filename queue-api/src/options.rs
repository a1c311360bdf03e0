//! Option structs for the `Queue` operations: the
//! `{priority=0, startDelay=0, jobId=auto}`-style optional-bag
//! parameters each operation accepts.

use std::time::Duration;

use crate::job::JobId;
use crate::schedule::Schedule;

pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    pub priority: i64,
    pub start_delay: Duration,
    pub job_id: Option<JobId>,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        EnqueueOptions {
            priority: 0,
            start_delay: Duration::ZERO,
            job_id: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConsumeOptions {
    pub consumer_group: String,
    pub max_retries: u32,
}

impl ConsumeOptions {
    pub fn new(consumer_group: impl Into<String>) -> Self {
        ConsumeOptions {
            consumer_group: consumer_group.into(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScheduleRecurringOptions {
    pub job_id: JobId,
    pub schedule: Schedule,
    pub start_delay: Duration,
    pub priority: i64,
}
