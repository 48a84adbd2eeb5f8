//! In-memory key/value store.
//!
//! Implements both [`ConfigPort`] and [`StoragePort`].  Backs the
//! simulation daemon and the test suite; a production build would put a
//! flash- or file-backed store behind the same traits.
//!
//! - Config validation: every field is range-checked before persistence.
//! - Namespace isolation: keys are stored as `"namespace::key"`.
//! - Atomic writes: a single map insert under the lock.

use std::collections::HashMap;

use log::info;
use parking_lot::Mutex;

use crate::app::ports::{ConfigError, ConfigPort, StorageError, StoragePort};
use crate::config::ServiceConfig;

const CONFIG_NAMESPACE: &str = "nfcd";
const CONFIG_KEY: &str = "svccfg";

/// Largest accepted value blob.
const MAX_BLOB_SIZE: usize = 4000;

#[derive(Default)]
pub struct MemStore {
    store: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemStore {
    pub fn new() -> Self {
        info!("MemStore: in-memory backend");
        Self::default()
    }

    fn composite_key(namespace: &str, key: &str) -> String {
        format!("{}::{}", namespace, key)
    }

    /// Number of stored keys across all namespaces.
    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn validate_config(cfg: &ServiceConfig) -> Result<(), ConfigError> {
    if !(1_000..=300_000).contains(&cfg.init_watchdog_ms) {
        return Err(ConfigError::ValidationFailed(
            "init_watchdog_ms must be 1000–300000",
        ));
    }
    if !(500..=60_000).contains(&cfg.routing_watchdog_ms) {
        return Err(ConfigError::ValidationFailed(
            "routing_watchdog_ms must be 500–60000",
        ));
    }
    if !(10..=10_000).contains(&cfg.presence_check_delay_ms) {
        return Err(ConfigError::ValidationFailed(
            "presence_check_delay_ms must be 10–10000",
        ));
    }
    if let Some(delay) = cfg.poll_delay_ms {
        if delay > 60_000 {
            return Err(ConfigError::ValidationFailed(
                "poll_delay_ms must be at most 60000",
            ));
        }
    }
    if !(1..=100).contains(&cfg.max_dispatch_failures) {
        return Err(ConfigError::ValidationFailed(
            "max_dispatch_failures must be 1–100",
        ));
    }
    if !(1..=600_000).contains(&cfg.max_polling_pause_ms) {
        return Err(ConfigError::ValidationFailed(
            "max_polling_pause_ms must be 1–600000",
        ));
    }
    if !(100..=60_000).contains(&cfg.apply_routing_retry_ms) {
        return Err(ConfigError::ValidationFailed(
            "apply_routing_retry_ms must be 100–60000",
        ));
    }
    if !(1..=2).contains(&cfg.default_uicc_slot) {
        return Err(ConfigError::ValidationFailed("default_uicc_slot must be 1 or 2"));
    }
    Ok(())
}

impl ConfigPort for MemStore {
    fn load(&self) -> Result<ServiceConfig, ConfigError> {
        let key = Self::composite_key(CONFIG_NAMESPACE, CONFIG_KEY);
        if let Some(bytes) = self.store.lock().get(&key) {
            let cfg: ServiceConfig =
                postcard::from_bytes(bytes).map_err(|_| ConfigError::Corrupted)?;
            info!("MemStore: loaded config from store");
            Ok(cfg)
        } else {
            info!("MemStore: no stored config, using defaults");
            Ok(ServiceConfig::default())
        }
    }

    fn save(&self, config: &ServiceConfig) -> Result<(), ConfigError> {
        validate_config(config)?;
        let bytes = postcard::to_allocvec(config).map_err(|_| ConfigError::IoError)?;
        if bytes.len() > MAX_BLOB_SIZE {
            return Err(ConfigError::StorageFull);
        }
        let key = Self::composite_key(CONFIG_NAMESPACE, CONFIG_KEY);
        self.store.lock().insert(key, bytes);
        info!("MemStore: config saved");
        Ok(())
    }
}

impl StoragePort for MemStore {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let composite = Self::composite_key(namespace, key);
        match self.store.lock().get(&composite) {
            Some(data) if data.len() > buf.len() => Err(StorageError::BufferTooSmall),
            Some(data) => {
                buf[..data.len()].copy_from_slice(data);
                Ok(data.len())
            }
            None => Err(StorageError::NotFound),
        }
    }

    fn write(&self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        if data.len() > MAX_BLOB_SIZE {
            return Err(StorageError::Full);
        }
        let composite = Self::composite_key(namespace, key);
        self.store.lock().insert(composite, data.to_vec());
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<(), StorageError> {
        let composite = Self::composite_key(namespace, key);
        self.store.lock().remove(&composite);
        Ok(())
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        let composite = Self::composite_key(namespace, key);
        self.store.lock().contains_key(&composite)
    }
}
