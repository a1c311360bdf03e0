//! End-to-end scenarios against the `memory` driver's public surface:
//! dispatch ordering, delayed availability, retry backoff, consumer
//! group isolation, capacity limits, and recurring firing -- all
//! driven through `tokio::time::pause`/`advance` where a delay is
//! involved, so these run instantly regardless of the real-world
//! duration being simulated.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use queue_api::{ConsumeOptions, EnqueueOptions, Error, JobContext, Queue, QueueDriver, Schedule, ScheduleRecurringOptions};
use queue_drv_memory::MemoryDriver;
use serde_json::{json, Value};

async fn new_queue(cfg: Value) -> Arc<dyn Queue> {
    MemoryDriver.create_queue("test", cfg).await.unwrap()
}

/// Lets every task spawned by a dispatch tick actually run before the
/// test inspects shared state. `tokio::time::advance` fires due
/// timers but doesn't by itself drive the tasks they wake.
async fn drain() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn higher_priority_job_is_delivered_first() {
    let queue = new_queue(json!({})).await;

    queue
        .enqueue(json!({"p": 1}), EnqueueOptions { priority: 1, ..Default::default() })
        .await
        .unwrap();
    queue
        .enqueue(json!({"p": 5}), EnqueueOptions { priority: 5, ..Default::default() })
        .await
        .unwrap();
    queue
        .enqueue(json!({"p": 3}), EnqueueOptions { priority: 3, ..Default::default() })
        .await
        .unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let order2 = order.clone();

    queue
        .consume(
            Arc::new(move |ctx: JobContext<Value>| {
                let order = order2.clone();
                Box::pin(async move {
                    order.lock().unwrap().push(ctx.data["p"].as_i64().unwrap());
                    Ok(())
                })
            }),
            ConsumeOptions::new("workers"),
        )
        .await
        .unwrap();

    for _ in 0..100 {
        if order.lock().unwrap().len() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(*order.lock().unwrap(), vec![5, 3, 1]);
    queue.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn start_delay_holds_the_job_back_until_it_elapses() {
    let queue = new_queue(json!({})).await;
    let delivered = Arc::new(AtomicUsize::new(0));
    let delivered2 = delivered.clone();

    queue
        .consume(
            Arc::new(move |_ctx: JobContext<Value>| {
                let delivered = delivered2.clone();
                Box::pin(async move {
                    delivered.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
            ConsumeOptions::new("workers"),
        )
        .await
        .unwrap();

    queue
        .enqueue(
            json!({}),
            EnqueueOptions {
                start_delay: Duration::from_secs(2),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    drain().await;
    assert_eq!(delivered.load(Ordering::SeqCst), 0, "must not fire before startDelay elapses");

    tokio::time::advance(Duration::from_secs(2)).await;
    drain().await;

    assert_eq!(delivered.load(Ordering::SeqCst), 1);
    queue.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn failed_job_is_retried_after_exponential_backoff() {
    let queue = new_queue(json!({})).await;
    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts2 = attempts.clone();

    queue
        .consume(
            Arc::new(move |ctx: JobContext<Value>| {
                let attempts = attempts2.clone();
                Box::pin(async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    if n == 1 {
                        Err(Error::HandlerError("transient".to_string()))
                    } else {
                        assert_eq!(ctx.attempts, 2, "retry must report attempt count 2");
                        Ok(())
                    }
                })
            }),
            ConsumeOptions::new("workers"),
        )
        .await
        .unwrap();

    queue.enqueue(json!({}), EnqueueOptions::default()).await.unwrap();

    drain().await;
    assert_eq!(attempts.load(Ordering::SeqCst), 1, "first attempt runs immediately");

    // backoff_delay(1, 1.0) == 2s.
    tokio::time::advance(Duration::from_secs(2)).await;
    drain().await;

    assert_eq!(attempts.load(Ordering::SeqCst), 2);

    let stats = queue.get_stats().await.unwrap();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 0);

    queue.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_count_as_failed_not_retried_forever() {
    let queue = new_queue(json!({})).await;
    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts2 = attempts.clone();

    queue
        .consume(
            Arc::new(move |_ctx: JobContext<Value>| {
                let attempts = attempts2.clone();
                Box::pin(async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(Error::HandlerError("always fails".to_string()))
                })
            }),
            ConsumeOptions {
                consumer_group: "workers".to_string(),
                max_retries: 2,
            },
        )
        .await
        .unwrap();

    queue.enqueue(json!({}), EnqueueOptions::default()).await.unwrap();

    drain().await;
    tokio::time::advance(Duration::from_secs(300)).await;
    drain().await;
    tokio::time::advance(Duration::from_secs(300)).await;
    drain().await;

    assert_eq!(attempts.load(Ordering::SeqCst), 3, "max_retries=2 allows 3 total invocations");

    let stats = queue.get_stats().await.unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.completed, 0);

    queue.stop().await.unwrap();
}

#[tokio::test]
async fn each_consumer_group_receives_every_job_independently() {
    let queue = new_queue(json!({})).await;

    let group_a = Arc::new(Mutex::new(Vec::new()));
    let group_a2 = group_a.clone();
    let group_b = Arc::new(Mutex::new(Vec::new()));
    let group_b2 = group_b.clone();

    queue
        .consume(
            Arc::new(move |ctx: JobContext<Value>| {
                let seen = group_a2.clone();
                Box::pin(async move {
                    seen.lock().unwrap().push(ctx.id.to_string());
                    Ok(())
                })
            }),
            ConsumeOptions::new("group-a"),
        )
        .await
        .unwrap();

    queue
        .consume(
            Arc::new(move |ctx: JobContext<Value>| {
                let seen = group_b2.clone();
                Box::pin(async move {
                    seen.lock().unwrap().push(ctx.id.to_string());
                    Ok(())
                })
            }),
            ConsumeOptions::new("group-b"),
        )
        .await
        .unwrap();

    for i in 0..4 {
        queue
            .enqueue(json!({"i": i}), EnqueueOptions::default())
            .await
            .unwrap();
    }

    for _ in 0..100 {
        if group_a.lock().unwrap().len() == 4 && group_b.lock().unwrap().len() == 4 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(group_a.lock().unwrap().len(), 4);
    assert_eq!(group_b.lock().unwrap().len(), 4);

    // `completed` counts per group-delivery, not per job: 4 jobs each
    // handled successfully by both groups is 8 completions.
    let stats = queue.get_stats().await.unwrap();
    assert_eq!(stats.completed, 8);

    queue.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn a_retry_in_one_group_does_not_redeliver_to_a_group_that_already_succeeded() {
    let queue = new_queue(json!({})).await;

    let group_a_calls = Arc::new(AtomicUsize::new(0));
    let group_a_calls2 = group_a_calls.clone();
    let group_b_calls = Arc::new(AtomicUsize::new(0));
    let group_b_calls2 = group_b_calls.clone();

    queue
        .consume(
            Arc::new(move |_ctx: JobContext<Value>| {
                let calls = group_a_calls2.clone();
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
            ConsumeOptions::new("group-a"),
        )
        .await
        .unwrap();

    queue
        .consume(
            Arc::new(move |_ctx: JobContext<Value>| {
                let calls = group_b_calls2.clone();
                Box::pin(async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n == 1 {
                        Err(Error::HandlerError("transient".to_string()))
                    } else {
                        Ok(())
                    }
                })
            }),
            ConsumeOptions::new("group-b"),
        )
        .await
        .unwrap();

    queue.enqueue(json!({}), EnqueueOptions::default()).await.unwrap();

    drain().await;
    assert_eq!(group_a_calls.load(Ordering::SeqCst), 1, "group-a succeeds on the first pass");
    assert_eq!(group_b_calls.load(Ordering::SeqCst), 1, "group-b fails on the first pass");

    // backoff_delay(1, 1.0) == 2s: group-b's retry re-inserts the job
    // into `pending`. A group-a that already has it marked `processed`
    // must not see it dispatched again.
    tokio::time::advance(Duration::from_secs(2)).await;
    drain().await;

    assert_eq!(group_b_calls.load(Ordering::SeqCst), 2, "group-b's retry succeeds");
    assert_eq!(
        group_a_calls.load(Ordering::SeqCst),
        1,
        "group-a must not be redelivered the job group-b is retrying"
    );

    let stats = queue.get_stats().await.unwrap();
    assert_eq!(stats.completed, 2, "one completion per group, no duplicates");
    assert_eq!(stats.failed, 0);

    queue.stop().await.unwrap();
}

#[tokio::test]
async fn enqueue_past_max_queue_size_is_rejected() {
    let queue = new_queue(json!({"maxQueueSize": 1})).await;

    queue
        .enqueue(
            json!({}),
            EnqueueOptions {
                start_delay: Duration::from_secs(3600),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let second = queue
        .enqueue(
            json!({}),
            EnqueueOptions {
                start_delay: Duration::from_secs(3600),
                ..Default::default()
            },
        )
        .await;

    assert_eq!(second, Err(Error::QueueFull));
    queue.stop().await.unwrap();
}

#[tokio::test]
async fn enqueue_with_a_known_job_id_is_idempotent() {
    let queue = new_queue(json!({})).await;

    let id = queue
        .enqueue(
            json!({}),
            EnqueueOptions {
                job_id: Some(Arc::from("fixed-id")),
                start_delay: Duration::from_secs(3600),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let id2 = queue
        .enqueue(
            json!({}),
            EnqueueOptions {
                job_id: Some(Arc::from("fixed-id")),
                start_delay: Duration::from_secs(3600),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(id, id2);

    let stats = queue.get_stats().await.unwrap();
    assert_eq!(stats.pending, 1, "the second call must not enqueue a duplicate");

    queue.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn recurring_interval_fires_repeatedly_until_canceled() {
    let queue = new_queue(json!({})).await;
    let fires = Arc::new(AtomicUsize::new(0));
    let fires2 = fires.clone();

    queue
        .consume(
            Arc::new(move |_ctx: JobContext<Value>| {
                let fires = fires2.clone();
                Box::pin(async move {
                    fires.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
            ConsumeOptions::new("workers"),
        )
        .await
        .unwrap();

    queue
        .schedule_recurring(
            json!({}),
            ScheduleRecurringOptions {
                job_id: Arc::from("heartbeat"),
                schedule: Schedule::Interval(Duration::from_secs(1)),
                start_delay: Duration::ZERO,
                priority: 0,
            },
        )
        .await
        .unwrap();

    drain().await;
    assert_eq!(fires.load(Ordering::SeqCst), 1, "first firing is immediate");

    tokio::time::advance(Duration::from_secs(1)).await;
    drain().await;
    assert_eq!(fires.load(Ordering::SeqCst), 2);

    tokio::time::advance(Duration::from_secs(1)).await;
    drain().await;
    assert_eq!(fires.load(Ordering::SeqCst), 3);

    queue.cancel_recurring("heartbeat").await.unwrap();
    assert!(queue.list_recurring_jobs().await.unwrap().is_empty());

    tokio::time::advance(Duration::from_secs(5)).await;
    drain().await;

    assert_eq!(fires.load(Ordering::SeqCst), 3, "no further firings after cancellation");

    queue.stop().await.unwrap();
}

#[tokio::test]
async fn stop_waits_for_an_in_flight_handler_to_finish() {
    let queue = new_queue(json!({})).await;
    let finished = Arc::new(AtomicUsize::new(0));
    let finished2 = finished.clone();

    queue
        .consume(
            Arc::new(move |_ctx: JobContext<Value>| {
                let finished = finished2.clone();
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
            ConsumeOptions::new("workers"),
        )
        .await
        .unwrap();

    queue.enqueue(json!({}), EnqueueOptions::default()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    queue.stop().await.unwrap();
    assert_eq!(finished.load(Ordering::SeqCst), 1, "stop must not return until the handler completes");
}
