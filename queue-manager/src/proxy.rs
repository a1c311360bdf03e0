//! The stable handle callers hold onto across backend switches: a
//! name, a swappable delegate, a replayable subscription list, and an
//! in-flight operation count a swap can wait down to zero.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, RwLock};

use queue_api::{
    ConsumeOptions, EnqueueOptions, Error, Handler, HandlerFuture, JobContext, JobId, Queue,
    QueueStats, RawContext, RecurringJobDetails, Result, ScheduleRecurringOptions,
};

pub type TypedHandlerFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// A caller's handler, typed over their own payload. `QueueProxy`
/// erases this into a `queue_api::Handler` before it ever reaches a
/// driver.
pub type TypedHandler<T> = Arc<dyn Fn(JobContext<T>) -> TypedHandlerFuture + Send + Sync>;

fn erase_handler<T>(handler: TypedHandler<T>) -> Handler
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    Arc::new(move |raw: RawContext| -> HandlerFuture {
        let handler = handler.clone();

        Box::pin(async move {
            let data: T = serde_json::from_value(raw.data)
                .map_err(|e| Error::Internal(format!("malformed job payload: {e}")))?;

            let ctx = JobContext {
                id: raw.id,
                data,
                priority: raw.priority,
                enqueued_at: raw.enqueued_at,
                attempts: raw.attempts,
            };

            (handler)(ctx).await
        })
    })
}

struct Subscription {
    group: String,
    handler: Handler,
    opts: ConsumeOptions,
}

/// Tracks operations in flight against the current delegate so a swap
/// can wait for quiescence instead of racing a half-installed one.
struct OpTracker {
    count: Mutex<usize>,
    quiescent: Notify,
}

impl OpTracker {
    fn new() -> Self {
        OpTracker {
            count: Mutex::new(0),
            quiescent: Notify::new(),
        }
    }

    async fn begin(&self) {
        *self.count.lock().await += 1;
    }

    async fn end(&self) {
        let mut count = self.count.lock().await;
        *count -= 1;

        if *count == 0 {
            self.quiescent.notify_waiters();
        }
    }

    async fn await_quiescent(&self) {
        loop {
            let notified = self.quiescent.notified();

            if *self.count.lock().await == 0 {
                break;
            }

            notified.await;
        }
    }
}

/// A stable, swap-tolerant handle to one named queue. The
/// `Arc<QueueProxy<T>>` a caller holds never changes across a backend
/// switch; only the delegate underneath is replaced.
pub struct QueueProxy<T> {
    name: String,
    delegate: RwLock<Option<Arc<dyn Queue>>>,
    subscriptions: Mutex<Vec<Subscription>>,
    ops: OpTracker,
    stopped: Mutex<bool>,
    _payload: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for QueueProxy<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueProxy").field("name", &self.name).finish()
    }
}

impl<T> QueueProxy<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub(crate) fn new(name: String) -> Self {
        QueueProxy {
            name,
            delegate: RwLock::new(None),
            subscriptions: Mutex::new(Vec::new()),
            ops: OpTracker::new(),
            stopped: Mutex::new(false),
            _payload: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn current_delegate(&self) -> Result<Arc<dyn Queue>> {
        if *self.stopped.lock().await {
            return Err(Error::Stopped);
        }

        self.delegate
            .read()
            .await
            .clone()
            .ok_or(Error::NotInitialized)
    }

    async fn run_op<R, F, Fut>(&self, f: F) -> Result<R>
    where
        F: FnOnce(Arc<dyn Queue>) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let delegate = self.current_delegate().await?;

        self.ops.begin().await;
        let result = f(delegate).await;
        self.ops.end().await;

        result
    }

    pub async fn enqueue(&self, data: T, opts: EnqueueOptions) -> Result<JobId> {
        let value =
            serde_json::to_value(&data).map_err(|e| Error::Internal(format!("{e}")))?;

        self.run_op(|delegate| async move { delegate.enqueue(value, opts).await })
            .await
    }

    /// Stores `handler` under `opts.consumer_group` (last registration
    /// per group wins) so a later swap can replay it, then forwards to
    /// the current delegate if one is installed and the proxy hasn't
    /// been stopped.
    pub async fn consume(&self, handler: TypedHandler<T>, opts: ConsumeOptions) -> Result<()> {
        let erased = erase_handler(handler);
        let group = opts.consumer_group.clone();

        {
            let mut subs = self.subscriptions.lock().await;

            match subs.iter_mut().find(|s| s.group == group) {
                Some(existing) => {
                    existing.handler = erased.clone();
                    existing.opts = opts.clone();
                }
                None => subs.push(Subscription {
                    group,
                    handler: erased.clone(),
                    opts: opts.clone(),
                }),
            }
        }

        if *self.stopped.lock().await {
            return Ok(());
        }

        let Some(delegate) = self.delegate.read().await.clone() else {
            return Ok(());
        };

        self.ops.begin().await;
        let result = delegate.consume(erased, opts).await;
        self.ops.end().await;

        result
    }

    pub async fn schedule_recurring(
        &self,
        data: T,
        opts: ScheduleRecurringOptions,
    ) -> Result<JobId> {
        let value =
            serde_json::to_value(&data).map_err(|e| Error::Internal(format!("{e}")))?;

        self.run_op(|delegate| async move { delegate.schedule_recurring(value, opts).await })
            .await
    }

    pub async fn cancel_recurring(&self, job_id: &str) -> Result<()> {
        self.run_op(|delegate| async move { delegate.cancel_recurring(job_id).await })
            .await
    }

    pub async fn list_recurring_jobs(&self) -> Result<Vec<JobId>> {
        self.run_op(|delegate| async move { delegate.list_recurring_jobs().await })
            .await
    }

    pub async fn get_recurring_job_details(
        &self,
        job_id: &str,
    ) -> Result<Option<RecurringJobDetails<Value>>> {
        let job_id = job_id.to_string();

        self.run_op(|delegate| async move { delegate.get_recurring_job_details(&job_id).await })
            .await
    }

    pub async fn get_in_flight_count(&self) -> Result<usize> {
        self.run_op(|delegate| async move { delegate.get_in_flight_count().await })
            .await
    }

    pub async fn test_connection(&self) -> Result<()> {
        self.run_op(|delegate| async move { delegate.test_connection().await })
            .await
    }

    pub async fn get_stats(&self) -> Result<QueueStats> {
        self.run_op(|delegate| async move { delegate.get_stats().await })
            .await
    }

    pub async fn stop(&self) -> Result<()> {
        {
            let mut stopped = self.stopped.lock().await;

            if *stopped {
                return Ok(());
            }

            *stopped = true;
        }

        self.ops.await_quiescent().await;

        if let Some(delegate) = self.delegate.write().await.take() {
            if let Err(e) = delegate.stop().await {
                tracing::warn!(queue = %self.name, error = %e, "error stopping delegate");
            }
        }

        Ok(())
    }

    /// Installs `new_queue` as the delegate: awaits quiescence of the
    /// previous one, stops it, installs the new one, clears `stopped`,
    /// then replays every stored subscription in insertion order.
    pub(crate) async fn switch_delegate(&self, new_queue: Arc<dyn Queue>) -> Result<()> {
        self.ops.await_quiescent().await;

        if let Some(previous) = self.delegate.write().await.take() {
            if let Err(e) = previous.stop().await {
                tracing::warn!(queue = %self.name, error = %e, "error stopping previous delegate during switch");
            }
        }

        *self.delegate.write().await = Some(new_queue.clone());
        *self.stopped.lock().await = false;

        let subs = self.subscriptions.lock().await;

        for sub in subs.iter() {
            new_queue.consume(sub.handler.clone(), sub.opts.clone()).await?;
        }

        Ok(())
    }

    pub(crate) async fn recurring_snapshot(&self) -> Result<Vec<RecurringJobDetails<Value>>> {
        let ids = self.list_recurring_jobs().await?;
        let mut out = Vec::with_capacity(ids.len());

        for id in ids {
            if let Some(details) = self.get_recurring_job_details(&id).await? {
                out.push(details);
            }
        }

        Ok(out)
    }

    pub(crate) async fn schedule_recurring_raw(
        &self,
        data: Value,
        opts: ScheduleRecurringOptions,
    ) -> Result<JobId> {
        self.run_op(|delegate| async move { delegate.schedule_recurring(data, opts).await })
            .await
    }
}

/// The manager's payload-agnostic view of a `QueueProxy<T>`: every
/// operation the switch protocol and aggregate queries need, none of
/// which touch the caller's `T` (jobs already cross the delegate
/// boundary as `serde_json::Value`).
#[async_trait]
pub(crate) trait ManagedProxy: Send + Sync {
    fn proxy_name(&self) -> &str;

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    async fn switch_delegate(&self, new_queue: Arc<dyn Queue>) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    async fn list_recurring_jobs(&self) -> Result<Vec<JobId>>;

    async fn get_in_flight_count(&self) -> Result<usize>;

    async fn recurring_snapshot(&self) -> Result<Vec<RecurringJobDetails<Value>>>;

    async fn schedule_recurring_raw(
        &self,
        data: Value,
        opts: ScheduleRecurringOptions,
    ) -> Result<JobId>;
}

#[async_trait]
impl<T> ManagedProxy for QueueProxy<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn proxy_name(&self) -> &str {
        &self.name
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    async fn switch_delegate(&self, new_queue: Arc<dyn Queue>) -> Result<()> {
        QueueProxy::switch_delegate(self, new_queue).await
    }

    async fn stop(&self) -> Result<()> {
        QueueProxy::stop(self).await
    }

    async fn list_recurring_jobs(&self) -> Result<Vec<JobId>> {
        QueueProxy::list_recurring_jobs(self).await
    }

    async fn get_in_flight_count(&self) -> Result<usize> {
        QueueProxy::get_in_flight_count(self).await
    }

    async fn recurring_snapshot(&self) -> Result<Vec<RecurringJobDetails<Value>>> {
        QueueProxy::recurring_snapshot(self).await
    }

    async fn schedule_recurring_raw(
        &self,
        data: Value,
        opts: ScheduleRecurringOptions,
    ) -> Result<JobId> {
        QueueProxy::schedule_recurring_raw(self, data, opts).await
    }
}
