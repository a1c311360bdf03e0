//! Traits and types shared by every component of the queue subsystem:
//! the `Queue`/`QueueDriver` contracts, the `ConfigService` and
//! `DriverRegistry` contracts consumed from the plugin host, job
//! identity, schedules, and the flat `Error` enum used throughout.

mod config_service;
mod driver;
mod error;
mod job;
mod options;
mod queue;
mod schedule;
mod stats;

pub use config_service::{
    ActivePointer, ConfigService, ConfigServiceExt, ACTIVE_POINTER_KEY,
    ACTIVE_POINTER_SCHEMA_VERSION,
};
pub use driver::{DriverConfig, DriverRegistry, QueueDriver};
pub use error::{Error, Result};
pub use job::{derived_job_id, is_derived_from, parent_recurring_id, JobContext, JobId, RawContext};
pub use options::{ConsumeOptions, EnqueueOptions, ScheduleRecurringOptions, DEFAULT_MAX_RETRIES};
pub use queue::{Handler, HandlerFuture, Queue};
pub use schedule::{RecurringJobDetails, Schedule};
pub use stats::{QueueStats, SwitchResult};
