//! Owns backend selection, Proxy lifecycle, and multi-instance config
//! coordination. The only component that calls `setActiveBackend` and
//! the only one that persists the active pointer.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use queue_api::{
    ActivePointer, ConfigService, ConfigServiceExt, DriverRegistry, Error, JobId, Queue, Result,
    ScheduleRecurringOptions, SwitchResult, ACTIVE_POINTER_KEY, ACTIVE_POINTER_SCHEMA_VERSION,
};

use crate::proxy::{ManagedProxy, QueueProxy};

const DEFAULT_DRIVER_ID: &str = "memory";

fn default_active_config() -> Value {
    serde_json::json!({"concurrency": 10, "maxQueueSize": 10000})
}

struct ManagerState {
    active_driver_id: String,
    active_config: Value,
    version: u64,
    proxies: HashMap<String, Arc<dyn ManagedProxy>>,
}

/// The Queue Manager: resolves the active driver, creates Proxies on
/// demand, runs the switch protocol, and polls for peer-initiated
/// switches.
pub struct QueueManager {
    registry: Arc<dyn DriverRegistry>,
    config_service: Arc<dyn ConfigService>,
    state: Mutex<ManagerState>,
    poll_handle: Mutex<Option<JoinHandle<()>>>,
}

impl QueueManager {
    pub fn new(registry: Arc<dyn DriverRegistry>, config_service: Arc<dyn ConfigService>) -> Self {
        QueueManager {
            registry,
            config_service,
            state: Mutex::new(ManagerState {
                active_driver_id: DEFAULT_DRIVER_ID.to_string(),
                active_config: default_active_config(),
                version: 0,
                proxies: HashMap::new(),
            }),
            poll_handle: Mutex::new(None),
        }
    }

    /// Reads the active pointer and the driver-specific config it
    /// names, adopting both on success. Never fails the caller: a
    /// missing pointer, an unknown driver, or an invalid config is
    /// logged and the prior (default) state is retained.
    pub async fn load_configuration(&self) {
        let pointer: Option<ActivePointer> = match self
            .config_service
            .get(ACTIVE_POINTER_KEY, ACTIVE_POINTER_SCHEMA_VERSION)
            .await
        {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read active pointer, keeping defaults");
                return;
            }
        };

        let Some(pointer) = pointer else {
            return;
        };

        let Some(driver) = self.registry.get_driver(&pointer.active_driver_id) else {
            tracing::warn!(driver = %pointer.active_driver_id, "unknown driver in active pointer, keeping defaults");
            return;
        };

        let config = match self
            .config_service
            .get_raw(&pointer.active_driver_id, driver.config_version())
            .await
        {
            Ok(Some(c)) => c,
            Ok(None) => {
                tracing::warn!(driver = %pointer.active_driver_id, "no stored config for active driver, keeping defaults");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to read driver config, keeping defaults");
                return;
            }
        };

        if let Err(e) = driver.validate_config(&config) {
            tracing::warn!(error = %e, "stored driver config failed validation, keeping defaults");
            return;
        }

        let mut state = self.state.lock().await;
        state.active_driver_id = pointer.active_driver_id;
        state.active_config = config;
        state.version = pointer.version;
    }

    /// Returns the named Proxy, creating it (with a freshly created
    /// delegate from the active driver) if it doesn't exist yet. A
    /// second call for the same name with a different `T` fails —
    /// every caller of a given queue name must agree on its payload
    /// type.
    pub async fn get_queue<T>(&self, name: &str) -> Result<Arc<QueueProxy<T>>>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let mut state = self.state.lock().await;

        if let Some(existing) = state.proxies.get(name).cloned() {
            drop(state);

            return existing.as_any().downcast::<QueueProxy<T>>().map_err(|_| {
                Error::Internal(format!(
                    "queue '{name}' already retrieved with a different payload type"
                ))
            });
        }

        let driver = self
            .registry
            .get_driver(&state.active_driver_id)
            .ok_or_else(|| Error::UnknownDriver(state.active_driver_id.clone()))?;
        let config = state.active_config.clone();
        drop(state);

        let delegate = driver.create_queue(name, config).await?;
        let proxy = Arc::new(QueueProxy::<T>::new(name.to_string()));
        proxy.switch_delegate(delegate).await?;

        let mut state = self.state.lock().await;
        state
            .proxies
            .insert(name.to_string(), proxy.clone() as Arc<dyn ManagedProxy>);

        Ok(proxy)
    }

    /// The switch protocol (§4.2.1): probe the new driver before
    /// touching any state, snapshot recurring definitions before
    /// teardown, stop every delegate, install fresh ones, migrate the
    /// snapshotted recurring definitions onto the fresh delegates (every
    /// switch replaces them, even a same-driver one), then persist.
    pub async fn set_active_backend(
        &self,
        driver_id: &str,
        config: Value,
    ) -> Result<SwitchResult> {
        let new_driver = self
            .registry
            .get_driver(driver_id)
            .ok_or_else(|| Error::UnknownDriver(driver_id.to_string()))?;

        new_driver.validate_config(&config)?;

        let probe = new_driver
            .create_queue("__connection_test__", config.clone())
            .await
            .map_err(|e| Error::ProbeFailed(e.to_string()))?;

        if let Err(e) = probe.test_connection().await {
            return Err(Error::ProbeFailed(e.to_string()));
        }
        if let Err(e) = probe.stop().await {
            return Err(Error::ProbeFailed(e.to_string()));
        }

        let proxies: Vec<Arc<dyn ManagedProxy>> = {
            let state = self.state.lock().await;
            state.proxies.values().cloned().collect()
        };

        let mut snapshots = Vec::with_capacity(proxies.len());
        for proxy in &proxies {
            match proxy.recurring_snapshot().await {
                Ok(snapshot) => snapshots.push((proxy.clone(), snapshot)),
                Err(e) => tracing::warn!(
                    queue = %proxy.proxy_name(), error = %e,
                    "failed to snapshot recurring jobs before switch"
                ),
            }
        }

        let mut in_flight = 0usize;
        for proxy in &proxies {
            match proxy.get_in_flight_count().await {
                Ok(n) => in_flight += n,
                Err(e) => tracing::warn!(
                    queue = %proxy.proxy_name(), error = %e,
                    "failed to read in-flight count before switch"
                ),
            }
        }
        if in_flight > 0 {
            tracing::warn!(
                count = in_flight,
                "switching backend with jobs in flight; they may be lost"
            );
        }

        for proxy in &proxies {
            if let Err(e) = proxy.stop().await {
                tracing::warn!(queue = %proxy.proxy_name(), error = %e, "error stopping delegate during switch");
            }
        }

        let version = {
            let mut state = self.state.lock().await;
            state.active_driver_id = driver_id.to_string();
            state.active_config = config.clone();
            state.version += 1;
            state.version
        };

        for proxy in &proxies {
            match new_driver.create_queue(proxy.proxy_name(), config.clone()).await {
                Ok(fresh) => {
                    if let Err(e) = proxy.switch_delegate(fresh).await {
                        tracing::warn!(
                            queue = %proxy.proxy_name(), error = %e,
                            "failed to install fresh delegate during switch"
                        );
                    }
                }
                Err(e) => tracing::warn!(
                    queue = %proxy.proxy_name(), error = %e,
                    "failed to create fresh delegate during switch"
                ),
            }
        }

        let mut migrated = 0usize;
        let mut warnings = Vec::new();

        // The fresh delegate installed above always starts with an empty
        // recurring map -- a same-driver switch loses recurring state just
        // as surely as a cross-driver one, since `switch_delegate` only
        // replays consumer subscriptions. Migrate on every switch.
        for (proxy, snapshot) in snapshots {
            for details in snapshot {
                let opts = ScheduleRecurringOptions {
                    job_id: details.job_id.clone(),
                    schedule: details.schedule.clone(),
                    start_delay: details.start_delay,
                    priority: details.priority,
                };

                match proxy
                    .schedule_recurring_raw(details.data.clone(), opts)
                    .await
                {
                    Ok(_) => migrated += 1,
                    Err(e) => {
                        tracing::warn!(
                            job_id = %details.job_id, error = %e,
                            "recurring job failed to migrate during switch"
                        );
                        warnings.push(format!("{}: {e}", details.job_id));
                    }
                }
            }
        }

        if let Err(e) = self
            .config_service
            .set_raw(driver_id, new_driver.config_version(), config)
            .await
        {
            tracing::error!(error = %e, "failed to persist driver config after switch");
        }

        let pointer = ActivePointer {
            active_driver_id: driver_id.to_string(),
            version,
        };
        if let Err(e) = self
            .config_service
            .set(ACTIVE_POINTER_KEY, ACTIVE_POINTER_SCHEMA_VERSION, &pointer)
            .await
        {
            tracing::error!(error = %e, "failed to persist active pointer after switch");
        }

        Ok(SwitchResult {
            success: true,
            migrated_recurring_jobs: migrated,
            warnings,
        })
    }

    pub async fn list_all_recurring_jobs(&self) -> Vec<JobId> {
        let proxies: Vec<Arc<dyn ManagedProxy>> =
            self.state.lock().await.proxies.values().cloned().collect();
        let mut all = Vec::new();

        for proxy in proxies {
            match proxy.list_recurring_jobs().await {
                Ok(ids) => all.extend(ids),
                Err(e) => {
                    tracing::warn!(queue = %proxy.proxy_name(), error = %e, "failed to list recurring jobs")
                }
            }
        }

        all
    }

    pub async fn get_in_flight_job_count(&self) -> usize {
        let proxies: Vec<Arc<dyn ManagedProxy>> =
            self.state.lock().await.proxies.values().cloned().collect();
        let mut total = 0;

        for proxy in proxies {
            match proxy.get_in_flight_count().await {
                Ok(n) => total += n,
                Err(e) => {
                    tracing::warn!(queue = %proxy.proxy_name(), error = %e, "failed to read in-flight count")
                }
            }
        }

        total
    }

    /// Starts the peer-change watcher (§4.2.2). Idempotent: a second
    /// call while one is already running is a no-op.
    pub async fn start_polling(self: &Arc<Self>, interval: Duration) {
        let mut handle_slot = self.poll_handle.lock().await;

        if handle_slot.is_some() {
            return;
        }

        let this = self.clone();
        *handle_slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                this.poll_once().await;
            }
        }));
    }

    /// One peer-change check: if the pointer's version differs from
    /// ours, install fresh delegates on every Proxy without
    /// re-migrating recurring jobs or re-persisting (the instance that
    /// called `set_active_backend` already did both).
    async fn poll_once(&self) {
        let pointer: Option<ActivePointer> = match self
            .config_service
            .get(ACTIVE_POINTER_KEY, ACTIVE_POINTER_SCHEMA_VERSION)
            .await
        {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "poll: failed to read active pointer");
                return;
            }
        };

        let Some(pointer) = pointer else {
            return;
        };

        if pointer.version == self.state.lock().await.version {
            return;
        }

        let Some(driver) = self.registry.get_driver(&pointer.active_driver_id) else {
            tracing::warn!(driver = %pointer.active_driver_id, "poll: unknown driver, keeping prior state");
            return;
        };

        let config = match self
            .config_service
            .get_raw(&pointer.active_driver_id, driver.config_version())
            .await
        {
            Ok(Some(c)) => c,
            Ok(None) => {
                tracing::warn!(driver = %pointer.active_driver_id, "poll: no stored config, keeping prior state");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "poll: failed to read driver config");
                return;
            }
        };

        if let Err(e) = driver.validate_config(&config) {
            tracing::warn!(error = %e, "poll: stored config failed validation, keeping prior state");
            return;
        }

        let proxies: Vec<Arc<dyn ManagedProxy>> =
            self.state.lock().await.proxies.values().cloned().collect();

        for proxy in &proxies {
            match driver.create_queue(proxy.proxy_name(), config.clone()).await {
                Ok(fresh) => {
                    if let Err(e) = proxy.switch_delegate(fresh).await {
                        tracing::warn!(
                            queue = %proxy.proxy_name(), error = %e,
                            "poll: failed to install fresh delegate"
                        );
                    }
                }
                Err(e) => tracing::warn!(
                    queue = %proxy.proxy_name(), error = %e,
                    "poll: failed to create fresh delegate"
                ),
            }
        }

        let mut state = self.state.lock().await;
        state.active_driver_id = pointer.active_driver_id;
        state.active_config = config;
        state.version = pointer.version;
    }

    /// Stops the poller (if running) and every Proxy.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.poll_handle.lock().await.take() {
            handle.abort();
        }

        let proxies: Vec<Arc<dyn ManagedProxy>> =
            self.state.lock().await.proxies.values().cloned().collect();

        for proxy in proxies {
            if let Err(e) = proxy.stop().await {
                tracing::warn!(queue = %proxy.proxy_name(), error = %e, "error stopping queue during shutdown");
            }
        }
    }
}
