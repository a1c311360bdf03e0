//! The pending-job list: a priority container where insertion
//! preserves FIFO at equal priority. A flat `Vec` with linear
//! insertion is acceptable given the `maxQueueSize` bound on every
//! queue created by this driver.

use chrono::{DateTime, Utc};
use queue_api::JobId;
use serde_json::Value;
use std::cmp::Reverse;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct PendingJob {
    pub id: JobId,
    pub data: Value,
    pub priority: i64,
    pub enqueued_at: DateTime<Utc>,
    /// Gated on `tokio::time::Instant` rather than wall-clock time so
    /// dispatch correctly honors `tokio::time::pause`/`advance` in
    /// tests; the scheduler that wakes a tick is already driven by the
    /// same virtualizable clock via `tokio::time::sleep`.
    pub available_at: Instant,
    pub attempts: u32,
    /// Enqueue-order tiebreaker. Preserved across a retry re-insert so
    /// a retried job keeps its original position relative to jobs
    /// that arrived around the same time, rather than jumping to the
    /// back of its priority band.
    pub seq: u64,
}

/// Sort key: descending priority, then ascending arrival order.
fn sort_key(job: &PendingJob) -> (Reverse<i64>, u64) {
    (Reverse(job.priority), job.seq)
}

/// Inserts `job` keeping the list ordered by descending priority,
/// FIFO among equal priorities. `availableAt` never affects ordering;
/// it only gates whether a dispatch sweep may select the job.
pub fn insert_sorted(pending: &mut Vec<PendingJob>, job: PendingJob) {
    let key = sort_key(&job);
    let pos = pending.partition_point(|j| sort_key(j) <= key);

    pending.insert(pos, job);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn job(id: &str, priority: i64, seq: u64) -> PendingJob {
        PendingJob {
            id: Arc::from(id),
            data: Value::Null,
            priority,
            enqueued_at: Utc::now(),
            available_at: Instant::now(),
            attempts: 0,
            seq,
        }
    }

    #[test]
    fn higher_priority_dispatches_first() {
        let mut pending = Vec::new();

        insert_sorted(&mut pending, job("a", 1, 0));
        insert_sorted(&mut pending, job("b", 5, 1));
        insert_sorted(&mut pending, job("c", 3, 2));

        let order: Vec<&str> = pending.iter().map(|j| &*j.id).collect();
        assert_eq!(order, vec!["b", "c", "a"]);
    }

    #[test]
    fn equal_priority_is_fifo() {
        let mut pending = Vec::new();

        insert_sorted(&mut pending, job("a", 0, 0));
        insert_sorted(&mut pending, job("b", 0, 1));
        insert_sorted(&mut pending, job("c", 0, 2));

        let order: Vec<&str> = pending.iter().map(|j| &*j.id).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }
}
