//! The `memory` driver's configuration: parsed and validated from the
//! `serde_json::Value` handed to `validate_config`/`create_queue`.

use queue_api::{DriverConfig, Error, Result};
use serde::{Deserialize, Serialize};

fn default_concurrency() -> u32 {
    10
}

fn default_max_queue_size() -> u32 {
    10_000
}

fn default_delay_multiplier() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryDriverConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    #[serde(default = "default_max_queue_size", rename = "maxQueueSize")]
    pub max_queue_size: u32,

    /// Scales both `startDelay` and retry backoff. Exists so tests (and
    /// a host under unusual load) can compress or stretch timing
    /// without touching call sites.
    #[serde(default = "default_delay_multiplier", rename = "delayMultiplier")]
    pub delay_multiplier: f64,

    /// A periodic safety-net dispatch sweep, independent of the
    /// per-enqueue timers. Guards against a dispatch tick that was
    /// scheduled but never ran reaching a job whose timer was dropped
    /// (e.g. a `start_delay` timer racing a process restart in a
    /// future persistent driver). `None` disables it.
    #[serde(default, rename = "heartbeatIntervalMs")]
    pub heartbeat_interval_ms: Option<u64>,
}

impl Default for MemoryDriverConfig {
    fn default() -> Self {
        MemoryDriverConfig {
            concurrency: default_concurrency(),
            max_queue_size: default_max_queue_size(),
            delay_multiplier: default_delay_multiplier(),
            heartbeat_interval_ms: None,
        }
    }
}

impl MemoryDriverConfig {
    pub fn parse(cfg: &DriverConfig) -> Result<Self> {
        let parsed: MemoryDriverConfig = serde_json::from_value(cfg.clone())
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;

        parsed.validate()?;
        Ok(parsed)
    }

    fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::InvalidConfig(
                "concurrency must be greater than zero".to_string(),
            ));
        }

        if self.max_queue_size == 0 {
            return Err(Error::InvalidConfig(
                "maxQueueSize must be greater than zero".to_string(),
            ));
        }

        if self.delay_multiplier <= 0.0 {
            return Err(Error::InvalidConfig(
                "delayMultiplier must be greater than zero".to_string(),
            ));
        }

        if matches!(self.heartbeat_interval_ms, Some(0)) {
            return Err(Error::InvalidConfig(
                "heartbeatIntervalMs must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_an_empty_object() {
        let cfg = MemoryDriverConfig::parse(&serde_json::json!({})).unwrap();

        assert_eq!(cfg.concurrency, 10);
        assert_eq!(cfg.max_queue_size, 10_000);
        assert_eq!(cfg.delay_multiplier, 1.0);
        assert_eq!(cfg.heartbeat_interval_ms, None);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        assert!(MemoryDriverConfig::parse(&serde_json::json!({ "concurrency": 0 })).is_err());
    }

    #[test]
    fn negative_delay_multiplier_is_rejected() {
        assert!(
            MemoryDriverConfig::parse(&serde_json::json!({ "delayMultiplier": -1.0 })).is_err()
        );
    }
}
