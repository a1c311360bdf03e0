//! The `ConfigService` contract consumed from the plugin host: a
//! versioned, schema-checked key/value store used for the active
//! driver pointer and each driver's own configuration.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_derive::{Deserialize, Serialize as SerializeDerive};
use serde_json::Value;

use crate::error::{Error, Result};

/// Well-known key for the active driver pointer.
pub const ACTIVE_POINTER_KEY: &str = "queue:active";

/// Schema version of `ActivePointer`. Stable at 1.
pub const ACTIVE_POINTER_SCHEMA_VERSION: u32 = 1;

/// The persisted, process-wide record coordinating backend selection
/// across instances. `version` is monotonic and is the sole signal
/// peers use to decide whether to reload.
#[derive(Debug, Clone, PartialEq, Eq, SerializeDerive, Deserialize)]
pub struct ActivePointer {
    pub active_driver_id: String,
    pub version: u64,
}

/// A versioned, schema-validated key/value store. Implementations
/// must version-check on read and return `Ok(None)` (not an error)
/// when the stored schema version doesn't match and can't be
/// migrated, so callers fall back to defaults.
///
/// Kept non-generic (JSON in, JSON out) so it stays usable as
/// `Arc<dyn ConfigService>`; `ConfigServiceExt` below layers the
/// typed, serde-driven API on top, the same split `Queue`/`QueueDriver`
/// use to stay object-safe.
#[async_trait]
pub trait ConfigService: Send + Sync {
    async fn get_raw(&self, key: &str, schema_version: u32) -> Result<Option<Value>>;

    async fn set_raw(&self, key: &str, schema_version: u32, value: Value) -> Result<()>;
}

#[async_trait]
pub trait ConfigServiceExt: ConfigService {
    async fn get<T>(&self, key: &str, schema_version: u32) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        match self.get_raw(key, schema_version).await? {
            Some(raw) => serde_json::from_value(raw)
                .map(Some)
                .map_err(|e| Error::Internal(format!("malformed config at '{key}': {e}"))),
            None => Ok(None),
        }
    }

    async fn set<T>(&self, key: &str, schema_version: u32, value: &T) -> Result<()>
    where
        T: Serialize + Sync,
    {
        let raw = serde_json::to_value(value)
            .map_err(|e| Error::Internal(format!("couldn't serialize config for '{key}': {e}")))?;

        self.set_raw(key, schema_version, raw).await
    }
}

impl<C: ConfigService + ?Sized> ConfigServiceExt for C {}
