//! Demo binary: wires the in-memory driver and the in-memory config
//! backend into a `QueueManager`, then exercises enqueue/consume,
//! recurring scheduling, and a live backend switch. Stands in for
//! whatever embeds this crate behind a real RPC admin surface.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use queue_api::{
    ConfigService, ConsumeOptions, DriverRegistry, EnqueueOptions, JobContext, Schedule,
    ScheduleRecurringOptions,
};
use queue_cfg_memory::InMemoryConfigService;
use queue_drv_memory::MemoryDriver;
use queue_manager::{InMemoryDriverRegistry, QueueManager};

#[derive(Parser)]
#[command(name = "queued", about = "Queue subsystem demo binary")]
struct Cli {
    /// Filter passed to `tracing_subscriber`'s `EnvFilter`, e.g. "debug" or "queue_manager=trace".
    #[arg(long, default_value = "info")]
    log_level: String,

    /// How often each instance polls the active pointer for peer-initiated switches.
    #[arg(long, default_value_t = 2_000)]
    poll_interval_ms: u64,
}

fn init_logging(filter: &str) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_new(filter)
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))?;

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NotificationJob {
    recipient: String,
    subject: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let mut registry = InMemoryDriverRegistry::new();
    registry.register(Arc::new(MemoryDriver));
    let registry: Arc<dyn DriverRegistry> = Arc::new(registry);
    let config_service: Arc<dyn ConfigService> = Arc::new(InMemoryConfigService::new());

    let manager = Arc::new(QueueManager::new(registry, config_service));
    manager.load_configuration().await;
    manager
        .start_polling(Duration::from_millis(cli.poll_interval_ms))
        .await;

    run_demo(&manager).await?;

    manager.shutdown().await;
    Ok(())
}

async fn run_demo(manager: &Arc<QueueManager>) -> anyhow::Result<()> {
    let queue = manager.get_queue::<NotificationJob>("notifications").await?;

    queue
        .consume(
            Arc::new(|ctx: JobContext<NotificationJob>| {
                Box::pin(async move {
                    tracing::info!(
                        job_id = %ctx.id,
                        recipient = %ctx.data.recipient,
                        subject = %ctx.data.subject,
                        "delivered notification"
                    );
                    Ok(())
                })
            }),
            ConsumeOptions::new("delivery"),
        )
        .await?;

    queue
        .enqueue(
            NotificationJob {
                recipient: "ops@example.com".to_string(),
                subject: "queue subsystem online".to_string(),
            },
            EnqueueOptions::default(),
        )
        .await?;

    queue
        .schedule_recurring(
            NotificationJob {
                recipient: "ops@example.com".to_string(),
                subject: "heartbeat".to_string(),
            },
            ScheduleRecurringOptions {
                job_id: Arc::from("heartbeat"),
                schedule: Schedule::Interval(Duration::from_secs(30)),
                start_delay: Duration::ZERO,
                priority: 0,
            },
        )
        .await?;

    tokio::time::sleep(Duration::from_millis(200)).await;

    let result = manager
        .set_active_backend("memory", serde_json::json!({"concurrency": 20, "maxQueueSize": 10000}))
        .await?;
    tracing::info!(
        migrated = result.migrated_recurring_jobs,
        warnings = result.warnings.len(),
        "switched active backend"
    );

    queue
        .enqueue(
            NotificationJob {
                recipient: "ops@example.com".to_string(),
                subject: "post-switch notification".to_string(),
            },
            EnqueueOptions::default(),
        )
        .await?;

    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(())
}
