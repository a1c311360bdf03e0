//! The in-process `Queue` implementation: a pending list guarded by a
//! single mutex, dispatched to competing consumer groups, with retry
//! backoff and recurring re-firing layered on top of the same
//! delayed-dispatch machinery used for `startDelay`.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, Semaphore};
use tokio::time::Instant;
use uuid::Uuid;

use queue_api::{
    derived_job_id, is_derived_from, ConsumeOptions, EnqueueOptions, Error, Handler, JobContext,
    JobId, Queue, QueueStats, RecurringJobDetails, Result, ScheduleRecurringOptions,
};

use crate::config::MemoryDriverConfig;
use crate::group::{Consumer, ConsumerGroupState};
use crate::pending::{insert_sorted, PendingJob};
use crate::recurring::{self, RecurringDef};
use crate::scheduler::{self, ScheduledHandle};

/// A retry ceiling so a misbehaving handler with a large `attempts`
/// count can't push a job's backoff out to days.
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// `2^attempts` seconds, scaled by the driver's `delayMultiplier` and
/// capped at `MAX_BACKOFF`. `attempts` is the post-increment count for
/// this failure, so the first retry waits ~2s, not ~1s.
fn backoff_delay(attempts: u32, multiplier: f64) -> Duration {
    let base_ms = 2u64.saturating_pow(attempts).saturating_mul(1000);
    let scaled_ms = (base_ms as f64 * multiplier).round() as u64;

    Duration::from_millis(scaled_ms).min(MAX_BACKOFF)
}

struct QueueState {
    pending: Vec<PendingJob>,
    groups: HashMap<String, ConsumerGroupState>,
    recurring: HashMap<JobId, RecurringDef>,
    completed: u64,
    failed: u64,
    in_flight: usize,
    /// Number of groups currently running a handler for a given job
    /// id. A job is only eligible for GC once every group has it
    /// marked `processed` *and* this count has dropped to zero --
    /// otherwise a group whose handler hasn't resolved yet could have
    /// its `processed` entry cleared out from under it by the very
    /// sweep that just dispatched to it, letting a sibling group
    /// re-receive the job once a retry re-inserts it.
    dispatching: HashMap<JobId, usize>,
    stopped: bool,
    next_seq: u64,
}

impl Default for QueueState {
    fn default() -> Self {
        QueueState {
            pending: Vec::new(),
            groups: HashMap::new(),
            recurring: HashMap::new(),
            completed: 0,
            failed: 0,
            in_flight: 0,
            dispatching: HashMap::new(),
            stopped: false,
            next_seq: 0,
        }
    }
}

struct Inner {
    config: MemoryDriverConfig,
    state: Mutex<QueueState>,
    semaphore: Semaphore,
    notify: Notify,
    /// Outstanding `startDelay`/retry/recurring timers, tracked so
    /// `stop()` can cancel them instead of leaving them to fire
    /// against a queue nobody is reading from anymore.
    timers: std::sync::Mutex<Vec<ScheduledHandle>>,
}

/// The reference `Queue` implementation backing the `memory` driver.
/// Cheap to clone: it's a handle around a single shared `Inner`.
#[derive(Clone)]
pub struct MemoryQueue(Arc<Inner>);

impl MemoryQueue {
    pub fn new(config: MemoryDriverConfig) -> Self {
        let concurrency = config.concurrency;

        MemoryQueue(Arc::new(Inner {
            config,
            state: Mutex::new(QueueState::default()),
            semaphore: Semaphore::new(concurrency as usize),
            notify: Notify::new(),
            timers: std::sync::Mutex::new(Vec::new()),
        }))
    }

    fn track_timer(&self, handle: ScheduledHandle) {
        self.0.timers.lock().unwrap_or_else(|e| e.into_inner()).push(handle);
    }

    fn spawn_tick(&self) {
        let this = self.clone();
        tokio::spawn(async move { this.dispatch_tick().await });
    }

    fn spawn_delayed_tick(&self, delay: Duration) {
        let this = self.clone();
        let handle = scheduler::schedule_after(delay, async move { this.dispatch_tick().await });

        self.track_timer(handle);
    }

    /// Starts the optional periodic safety-net sweep described by
    /// `heartbeatIntervalMs`. A dispatch tick is otherwise only ever
    /// scheduled in reaction to an enqueue, a retry, or a completion;
    /// the heartbeat exists so a lost or aborted per-job timer can't
    /// strand a job in the pending list indefinitely.
    pub(crate) fn start_heartbeat(&self, interval: Duration) {
        let this = self.clone();
        let handle = scheduler::schedule_every(interval, move || {
            let this = this.clone();
            async move { this.dispatch_tick().await }
        });

        self.track_timer(handle);
    }

    async fn enqueue_job(
        &self,
        data: Value,
        priority: i64,
        start_delay: Duration,
        job_id: Option<JobId>,
    ) -> Result<JobId> {
        let mut state = self.0.state.lock().await;

        if state.stopped {
            return Err(Error::Stopped);
        }

        if let Some(ref id) = job_id {
            if state.pending.iter().any(|j| &j.id == id) {
                return Ok(id.clone());
            }
        }

        if state.pending.len() >= self.0.config.max_queue_size as usize {
            return Err(Error::QueueFull);
        }

        let id = job_id.unwrap_or_else(|| Arc::from(Uuid::new_v4().to_string().as_str()));
        let delay = start_delay.mul_f64(self.0.config.delay_multiplier);
        let available_at = Instant::now() + delay;
        let seq = state.next_seq;
        state.next_seq += 1;

        insert_sorted(
            &mut state.pending,
            PendingJob {
                id: id.clone(),
                data,
                priority,
                enqueued_at: Utc::now(),
                available_at,
                attempts: 0,
                seq,
            },
        );
        drop(state);

        if delay.is_zero() {
            self.spawn_tick();
        } else {
            self.spawn_delayed_tick(delay);
        }

        Ok(id)
    }

    /// One dispatch sweep: for every group with at least one consumer,
    /// finds the oldest available job that group hasn't already
    /// dispatched, hands it to the next consumer in round-robin order,
    /// then garbage-collects pending jobs every group has consumed.
    /// Handlers run outside the state lock.
    async fn dispatch_tick(&self) {
        let mut to_run: Vec<(String, PendingJob, Consumer)> = Vec::new();

        {
            let mut state = self.0.state.lock().await;

            if state.stopped {
                return;
            }

            let now = Instant::now();
            let group_names: Vec<String> = state.groups.keys().cloned().collect();

            for name in group_names {
                let Some(group) = state.groups.get(&name) else {
                    continue;
                };

                if group.consumers.is_empty() {
                    continue;
                }

                let pick = state
                    .pending
                    .iter()
                    .find(|j| j.available_at <= now && !group.processed.contains(&j.id))
                    .map(|j| j.clone());

                let Some(job) = pick else { continue };
                let group = state.groups.get_mut(&name).expect("checked above");

                group.processed.insert(job.id.clone());
                let consumer = group.next_consumer();

                *state.dispatching.entry(job.id.clone()).or_insert(0) += 1;
                to_run.push((name, job, consumer));
            }

            if !state.groups.is_empty() {
                let group_count = state.groups.len();
                let fully_processed: Vec<JobId> = state
                    .pending
                    .iter()
                    .filter(|j| {
                        state
                            .groups
                            .values()
                            .filter(|g| g.processed.contains(&j.id))
                            .count()
                            == group_count
                            && state.dispatching.get(&j.id).copied().unwrap_or(0) == 0
                    })
                    .map(|j| j.id.clone())
                    .collect();

                if !fully_processed.is_empty() {
                    state.pending.retain(|j| !fully_processed.contains(&j.id));
                    for group in state.groups.values_mut() {
                        for id in &fully_processed {
                            group.processed.remove(id);
                        }
                    }
                }
            }
        }

        for (group_name, job, consumer) in to_run {
            let this = self.clone();
            tokio::spawn(async move { this.execute_job(group_name, job, consumer).await });
        }
    }

    async fn execute_job(&self, group_name: String, job: PendingJob, consumer: Consumer) {
        let Ok(_permit) = self.0.semaphore.acquire().await else {
            return;
        };

        {
            let mut state = self.0.state.lock().await;
            state.in_flight += 1;
        }

        let ctx = JobContext {
            id: job.id.clone(),
            data: job.data.clone(),
            priority: job.priority,
            enqueued_at: job.enqueued_at,
            attempts: job.attempts + 1,
        };

        let outcome = (consumer.handler)(ctx).await;
        let mut recurring_to_fire: Option<(JobId, RecurringDef)> = None;

        {
            let mut state = self.0.state.lock().await;

            match outcome {
                Ok(()) => {
                    state.completed += 1;

                    if let Some((rid, def)) = state
                        .recurring
                        .iter()
                        .find(|(rid, def)| def.enabled && is_derived_from(&job.id, rid))
                        .map(|(rid, def)| (rid.clone(), def.clone()))
                    {
                        recurring_to_fire = Some((rid, def));
                    }
                }
                Err(e) => {
                    tracing::warn!(job_id = %job.id, group = %group_name, error = %e, "handler failed");

                    if job.attempts < consumer.max_retries {
                        if let Some(group) = state.groups.get_mut(&group_name) {
                            group.processed.remove(&job.id);
                        }

                        let attempts = job.attempts + 1;
                        let delay = backoff_delay(attempts, self.0.config.delay_multiplier);
                        let available_at = Instant::now() + delay;
                        let seq = state.next_seq;
                        state.next_seq += 1;

                        // The dispatched job is still sitting in `pending`
                        // (GC only drops it once every group has it marked
                        // `processed`, which this group's own retry just
                        // undid) -- drop that stale copy so the retried
                        // one doesn't sit alongside it and get picked up
                        // early, ignoring the backoff delay entirely.
                        state.pending.retain(|j| j.id != job.id);
                        insert_sorted(
                            &mut state.pending,
                            PendingJob {
                                attempts,
                                available_at,
                                seq,
                                ..job.clone()
                            },
                        );

                        drop(state);
                        self.spawn_delayed_tick(delay);
                        state = self.0.state.lock().await;
                    } else {
                        state.failed += 1;
                    }
                }
            }

            if let Some(count) = state.dispatching.get_mut(&job.id) {
                *count -= 1;
                if *count == 0 {
                    state.dispatching.remove(&job.id);
                }
            }

            state.in_flight -= 1;
        }

        self.0.notify.notify_waiters();

        if let Some((rid, def)) = recurring_to_fire {
            self.reschedule_recurring(rid, def).await;
        }

        self.spawn_tick();
    }

    /// Computes and enqueues the next firing of a recurring definition
    /// that just completed successfully. Re-checks the definition is
    /// still present and enabled, since it may have been canceled or
    /// replaced while the job it fired was in flight.
    async fn reschedule_recurring(&self, recurring_id: JobId, fired_def: RecurringDef) {
        let still_enabled = {
            let state = self.0.state.lock().await;
            state
                .recurring
                .get(&recurring_id)
                .map(|d| d.enabled)
                .unwrap_or(false)
        };

        if !still_enabled {
            return;
        }

        let now = Utc::now();
        let Some(next_at) = recurring::next_fire(&fired_def.schedule, now) else {
            return;
        };

        let delay = (next_at - now).to_std().unwrap_or(Duration::ZERO);
        let derived_id = derived_job_id(&recurring_id, next_at);

        let _ = self
            .enqueue_job(
                fired_def.data.clone(),
                fired_def.priority,
                delay,
                Some(derived_id),
            )
            .await;
    }

    /// Removes any still-pending derived firings of `recurring_id` from
    /// the pending list and every group's processed set, as part of
    /// replacing or canceling a recurring definition.
    fn purge_pending_derived(state: &mut QueueState, recurring_id: &str) {
        let doomed: Vec<JobId> = state
            .pending
            .iter()
            .filter(|j| is_derived_from(&j.id, recurring_id))
            .map(|j| j.id.clone())
            .collect();

        if doomed.is_empty() {
            return;
        }

        state.pending.retain(|j| !doomed.contains(&j.id));
        for group in state.groups.values_mut() {
            for id in &doomed {
                group.processed.remove(id);
            }
        }
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn enqueue(&self, data: Value, opts: EnqueueOptions) -> Result<JobId> {
        self.enqueue_job(data, opts.priority, opts.start_delay, opts.job_id)
            .await
    }

    async fn consume(&self, handler: Handler, opts: ConsumeOptions) -> Result<()> {
        let mut state = self.0.state.lock().await;

        if state.stopped {
            return Err(Error::Stopped);
        }

        state
            .groups
            .entry(opts.consumer_group)
            .or_insert_with(ConsumerGroupState::default)
            .consumers
            .push(Consumer {
                handler,
                max_retries: opts.max_retries,
            });
        drop(state);

        self.spawn_tick();
        Ok(())
    }

    async fn schedule_recurring(
        &self,
        data: Value,
        opts: ScheduleRecurringOptions,
    ) -> Result<JobId> {
        recurring::validate(&opts.schedule).map_err(Error::InvalidSchedule)?;

        let mut state = self.0.state.lock().await;

        if state.stopped {
            return Err(Error::Stopped);
        }

        Self::purge_pending_derived(&mut state, &opts.job_id);

        state.recurring.insert(
            opts.job_id.clone(),
            RecurringDef {
                data: data.clone(),
                priority: opts.priority,
                schedule: opts.schedule,
                start_delay: opts.start_delay,
                enabled: true,
            },
        );
        drop(state);

        let first_id = derived_job_id(&opts.job_id, Utc::now());
        self.enqueue_job(data, opts.priority, opts.start_delay, Some(first_id))
            .await?;

        Ok(opts.job_id)
    }

    async fn cancel_recurring(&self, job_id: &str) -> Result<()> {
        let mut state = self.0.state.lock().await;

        if let Some(def) = state.recurring.get_mut(job_id) {
            def.enabled = false;
        }

        Self::purge_pending_derived(&mut state, job_id);
        Ok(())
    }

    async fn list_recurring_jobs(&self) -> Result<Vec<JobId>> {
        let state = self.0.state.lock().await;

        Ok(state
            .recurring
            .iter()
            .filter(|(_, def)| def.enabled)
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn get_recurring_job_details(
        &self,
        job_id: &str,
    ) -> Result<Option<RecurringJobDetails<Value>>> {
        let state = self.0.state.lock().await;

        let Some(def) = state.recurring.get(job_id).filter(|d| d.enabled) else {
            return Ok(None);
        };

        Ok(Some(RecurringJobDetails {
            job_id: Arc::from(job_id),
            data: def.data.clone(),
            priority: def.priority,
            schedule: def.schedule.clone(),
            start_delay: def.start_delay,
            next_run_at: recurring::next_fire(&def.schedule, Utc::now()),
        }))
    }

    async fn get_in_flight_count(&self) -> Result<usize> {
        Ok(self.0.state.lock().await.in_flight)
    }

    async fn test_connection(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        {
            let mut state = self.0.state.lock().await;

            if state.stopped {
                return Ok(());
            }

            state.stopped = true;
        }

        for handle in self.0.timers.lock().unwrap_or_else(|e| e.into_inner()).drain(..) {
            handle.cancel();
        }

        loop {
            let notified = self.0.notify.notified();
            let in_flight = self.0.state.lock().await.in_flight;

            if in_flight == 0 {
                break;
            }

            notified.await;
        }

        Ok(())
    }

    async fn get_stats(&self) -> Result<QueueStats> {
        let state = self.0.state.lock().await;

        Ok(QueueStats {
            pending: state.pending.len(),
            processing: state.in_flight,
            completed: state.completed,
            failed: state.failed,
            consumer_groups: state.groups.len(),
        })
    }
}
