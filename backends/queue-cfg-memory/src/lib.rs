//! An in-process `ConfigService`: a `RwLock`-guarded table standing in
//! for whatever persistent key/value store the plugin host actually
//! supplies. Every entry remembers the schema version it was written
//! with; a read under a different version is treated as unmigratable
//! and yields `Ok(None)`, per the contract.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

use queue_api::{ConfigService, Result};

struct Entry {
    schema_version: u32,
    value: Value,
}

#[derive(Default)]
pub struct InMemoryConfigService {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryConfigService {
    pub fn new() -> Self {
        InMemoryConfigService {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ConfigService for InMemoryConfigService {
    async fn get_raw(&self, key: &str, schema_version: u32) -> Result<Option<Value>> {
        let entries = self.entries.read().await;

        Ok(match entries.get(key) {
            Some(entry) if entry.schema_version == schema_version => Some(entry.value.clone()),
            Some(entry) => {
                tracing::warn!(
                    key, stored_version = entry.schema_version, requested_version = schema_version,
                    "stored config schema version mismatch, no migration available"
                );
                None
            }
            None => None,
        })
    }

    async fn set_raw(&self, key: &str, schema_version: u32, value: Value) -> Result<()> {
        self.entries.write().await.insert(
            key.to_string(),
            Entry {
                schema_version,
                value,
            },
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queue_api::ConfigServiceExt;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Widget {
        count: u32,
    }

    #[tokio::test]
    async fn round_trips_a_typed_value() {
        let svc = InMemoryConfigService::new();

        svc.set("widget", 1, &Widget { count: 3 }).await.unwrap();
        let got: Option<Widget> = svc.get("widget", 1).await.unwrap();

        assert_eq!(got, Some(Widget { count: 3 }));
    }

    #[tokio::test]
    async fn version_mismatch_yields_none_not_an_error() {
        let svc = InMemoryConfigService::new();

        svc.set_raw("widget", 1, serde_json::json!({"count": 3}))
            .await
            .unwrap();

        let got = svc.get_raw("widget", 2).await.unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn missing_key_yields_none() {
        let svc = InMemoryConfigService::new();
        let got = svc.get_raw("absent", 1).await.unwrap();

        assert_eq!(got, None);
    }
}
