//! Cancelable delayed/repeating work, abstracted so both the short
//! waits (startDelay, retry backoff) and the very long ones (a cron
//! definition that fires once a month) share one mechanism. A future
//! persistent driver, whose host timer may have a real maximum span,
//! can reuse the same chunking rather than each caller reimplementing
//! it.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// No single `tokio::time::sleep` call waits longer than this; longer
/// delays are covered by sleeping this long repeatedly. `tokio::time`
/// has no real upper bound on a 64-bit platform, but chunking is kept
/// anyway so the abstraction matches what a host timer with an actual
/// maximum span would need.
const MAX_SINGLE_SLEEP: Duration = Duration::from_secs(3600);

/// A scheduled, cancelable unit of delayed work.
pub struct ScheduledHandle {
    task: JoinHandle<()>,
}

impl ScheduledHandle {
    pub fn cancel(&self) {
        self.task.abort();
    }
}

/// Runs `f` after `delay`, chunking the wait if it exceeds
/// `MAX_SINGLE_SLEEP`.
pub fn schedule_after<F>(delay: Duration, f: F) -> ScheduledHandle
where
    F: Future<Output = ()> + Send + 'static,
{
    let task = tokio::spawn(async move {
        let mut remaining = delay;

        while remaining > MAX_SINGLE_SLEEP {
            tokio::time::sleep(MAX_SINGLE_SLEEP).await;
            remaining -= MAX_SINGLE_SLEEP;
        }

        tokio::time::sleep(remaining).await;
        f.await;
    });

    ScheduledHandle { task }
}

/// Runs `f` every `period`, starting after the first `period` elapses.
pub fn schedule_every<F, Fut>(period: Duration, mut f: F) -> ScheduledHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);

        interval.tick().await;
        loop {
            interval.tick().await;
            f().await;
        }
    });

    ScheduledHandle { task }
}
