//! The `QueueDriver` contract and the registry that resolves driver
//! ids to implementations.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::error::Result;
use crate::queue::Queue;

/// How configuration is handed to a driver. Each driver interprets
/// its own schema; the manager only knows how to validate it through
/// `QueueDriver::validate_config` and persist/reload it opaquely.
pub type DriverConfig = Value;

/// A pluggable implementation of the `Queue` contract. Implementations
/// must be safe to create many named queues from the same driver
/// instance sharing the same config -- the manager does exactly that
/// for every proxy it owns.
#[async_trait]
pub trait QueueDriver: Send + Sync {
    /// Short, unique identifier used as the registry key and as the
    /// persisted `activeDriverId`.
    fn id(&self) -> &str;

    /// Human-readable name, for admin surfaces.
    fn name(&self) -> &str;

    /// One-line description, for admin surfaces.
    fn description(&self) -> &str;

    /// Schema version of this driver's config, so a `ConfigService`
    /// can detect and reject stale persisted configs.
    fn config_version(&self) -> u32;

    /// Validates a prospective config without creating anything.
    /// Called during `setActiveBackend` before the probe step.
    fn validate_config(&self, cfg: &DriverConfig) -> Result<()>;

    /// Creates a new `Queue` instance named `name`, configured with
    /// `cfg` (already validated).
    async fn create_queue(&self, name: &str, cfg: DriverConfig) -> Result<Arc<dyn Queue>>;
}

/// Resolves driver ids to implementations. In the full platform this
/// is provided by the plugin host; this crate defines only the
/// consumed contract. `queue-manager::registry` supplies the concrete
/// in-process implementation this repository runs against.
pub trait DriverRegistry: Send + Sync {
    fn get_driver(&self, id: &str) -> Option<Arc<dyn QueueDriver>>;

    /// Enumerates every registered driver's id, for admin surfaces.
    fn list_driver_ids(&self) -> Vec<String>;
}
