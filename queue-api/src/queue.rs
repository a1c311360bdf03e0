//! The `Queue` contract every driver-created queue implements.
//!
//! The trait is deliberately not generic over the payload type: a
//! generic method can't be called through a `dyn QueueDriver` picked
//! out of a heterogeneous registry at runtime, since there would be
//! no single vtable entry to dispatch through. Jobs therefore cross
//! this boundary as `serde_json::Value`; `queue-manager`'s
//! `QueueProxy<T>` is the layer that is generic over a caller's `T`,
//! serializing on the way in and deserializing on the way out.

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::Result;
use crate::job::{JobId, RawContext};
use crate::options::{ConsumeOptions, EnqueueOptions, ScheduleRecurringOptions};
use crate::schedule::RecurringJobDetails;
use crate::stats::QueueStats;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// A consumer's handler, erased to operate on JSON payloads. Built by
/// `queue-manager` from a caller's typed closure.
pub type Handler = Arc<dyn Fn(RawContext) -> HandlerFuture + Send + Sync>;

/// The operations every driver-created queue must implement. A single
/// instance is owned exclusively by one `QueueProxy`, which is the
/// only code permitted to call `stop()` on it outside of the driver's
/// own connection probe.
#[async_trait]
pub trait Queue: Send + Sync {
    async fn enqueue(&self, data: Value, opts: EnqueueOptions) -> Result<JobId>;

    async fn consume(&self, handler: Handler, opts: ConsumeOptions) -> Result<()>;

    async fn schedule_recurring(
        &self,
        data: Value,
        opts: ScheduleRecurringOptions,
    ) -> Result<JobId>;

    async fn cancel_recurring(&self, job_id: &str) -> Result<()>;

    async fn list_recurring_jobs(&self) -> Result<Vec<JobId>>;

    async fn get_recurring_job_details(
        &self,
        job_id: &str,
    ) -> Result<Option<RecurringJobDetails<Value>>>;

    async fn get_in_flight_count(&self) -> Result<usize>;

    async fn test_connection(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    async fn get_stats(&self) -> Result<QueueStats>;
}
