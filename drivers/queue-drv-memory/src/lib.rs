//! The reference `memory` `QueueDriver`: a single-process, in-memory
//! implementation of the full `Queue` contract. Nothing here survives
//! a restart; it exists as the default backend and as the pattern a
//! persistent driver (e.g. backed by Redis or a database) would
//! follow.

mod config;
mod group;
mod pending;
mod queue;
mod recurring;
mod scheduler;

pub use config::MemoryDriverConfig;
pub use queue::MemoryQueue;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use queue_api::{DriverConfig, Queue, QueueDriver, Result};

pub const DRIVER_ID: &str = "memory";

/// Registers the `memory` driver under `DRIVER_ID`.
pub struct MemoryDriver;

#[async_trait]
impl QueueDriver for MemoryDriver {
    fn id(&self) -> &str {
        DRIVER_ID
    }

    fn name(&self) -> &str {
        "In-Memory Queue"
    }

    fn description(&self) -> &str {
        "Single-process, non-persistent queue for development and as the default backend"
    }

    fn config_version(&self) -> u32 {
        1
    }

    fn validate_config(&self, cfg: &DriverConfig) -> Result<()> {
        MemoryDriverConfig::parse(cfg).map(|_| ())
    }

    async fn create_queue(&self, _name: &str, cfg: DriverConfig) -> Result<Arc<dyn Queue>> {
        let config = MemoryDriverConfig::parse(&cfg)?;
        let heartbeat = config.heartbeat_interval_ms;
        let queue = MemoryQueue::new(config);

        if let Some(ms) = heartbeat {
            queue.start_heartbeat(Duration::from_millis(ms));
        }

        Ok(Arc::new(queue))
    }
}
