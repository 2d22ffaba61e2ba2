//! Cache subsystem: driver registry, store manager, repository facade,
//! tagged invalidation, and cooperative locks.
//!
//! Stores are declared in configuration under `cache.stores.<name>` with a
//! `driver` key plus driver-specific options; `cache.default` names the
//! store handed out when none is requested. Drivers are registered on the
//! manager (engine-scoped), with builtin `memory`, `file`, and `remote`
//! drivers available out of the box.
//!
//! ```json
//! {
//!   "cache": {
//!     "default": "memory",
//!     "stores": {
//!       "memory": {"driver": "memory"},
//!       "disk": {"driver": "file", "root": "./storage/cache"},
//!       "shared": {"driver": "remote", "addr": "127.0.0.1:6379", "prefix": "app:"}
//!     }
//!   }
//! }
//! ```

pub mod drivers;
pub mod lock;
pub mod repository;
pub mod tagged;

use crate::cache::drivers::file::FileStore;
use crate::cache::drivers::memory::MemoryStore;
use crate::cache::drivers::remote::RemoteStore;
use crate::cache::drivers::Store;
use crate::cache::repository::Repository;
use crate::config::Config;
use crate::engine::container::Container;
use crate::engine::events::EventBus;
use ahash::HashMap as AHashMap;
use serde_json::{Map, Value};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Errors raised by the cache subsystem.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("unknown cache store: {0}")]
    UnknownStore(String),

    #[error("unknown cache driver: {0}")]
    UnknownDriver(String),

    #[error("cache configuration error: {0}")]
    Configuration(String),

    #[error("driver {driver} missing required config keys: {keys:?}")]
    MissingConfig { driver: String, keys: Vec<String> },

    #[error("lock {name:?} not acquired within {waited:?}")]
    LockTimeout { name: String, waited: Duration },

    #[error("cache i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache serialization error: {0}")]
    Serialization(String),

    #[error("remote cache error: {0}")]
    Remote(String),
}

impl CacheError {
    fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::MissingConfig { .. })
    }
}

type DriverFactory =
    Arc<dyn Fn(&Map<String, Value>, &Container) -> Result<Arc<dyn Store>, CacheError> + Send + Sync>;
type ConfigBuilder =
    Arc<dyn Fn(Map<String, Value>, &Container) -> Result<Map<String, Value>, CacheError> + Send + Sync>;
type Validator = Arc<dyn Fn(&Map<String, Value>) -> Result<(), CacheError> + Send + Sync>;

/// Registration record for a cache driver.
pub struct DriverSpec {
    factory: DriverFactory,
    config_builder: Option<ConfigBuilder>,
    validator: Option<Validator>,
    required: Vec<String>,
}

impl DriverSpec {
    pub fn new(
        factory: impl Fn(&Map<String, Value>, &Container) -> Result<Arc<dyn Store>, CacheError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            factory: Arc::new(factory),
            config_builder: None,
            validator: None,
            required: Vec::new(),
        }
    }

    /// Keys that must be present in the final config map.
    pub fn require(mut self, keys: &[&str]) -> Self {
        self.required = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    /// Transforms user config (with container access) into the final map.
    pub fn build_config(
        mut self,
        builder: impl Fn(Map<String, Value>, &Container) -> Result<Map<String, Value>, CacheError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.config_builder = Some(Arc::new(builder));
        self
    }

    /// Validates the final config map before the factory runs.
    pub fn validate(
        mut self,
        validator: impl Fn(&Map<String, Value>) -> Result<(), CacheError> + Send + Sync + 'static,
    ) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }
}

/// Engine-scoped cache manager: driver registry plus resolved stores.
pub struct CacheManager {
    drivers: RwLock<AHashMap<String, Arc<DriverSpec>>>,
    configs: AHashMap<String, Map<String, Value>>,
    instances: RwLock<AHashMap<String, Repository>>,
    default_store: String,
    events: Arc<EventBus>,
    container: Arc<Container>,
}

impl CacheManager {
    /// Builds the manager from the `cache.*` config section and registers
    /// the builtin drivers. An implicit in-memory store named `memory` is
    /// provided when no stores are configured.
    pub fn new(
        config: &Config,
        events: Arc<EventBus>,
        container: Arc<Container>,
    ) -> Result<Self, CacheError> {
        let mut configs: AHashMap<String, Map<String, Value>> = AHashMap::default();
        if let Some(stores) = config.get_map("cache.stores") {
            for (name, value) in stores {
                let map = value.as_object().cloned().ok_or_else(|| {
                    CacheError::Configuration(format!(
                        "cache.stores.{} must be an object",
                        name
                    ))
                })?;
                configs.insert(name, map);
            }
        }
        if configs.is_empty() {
            let mut memory = Map::new();
            memory.insert("driver".to_string(), Value::String("memory".to_string()));
            configs.insert("memory".to_string(), memory);
        }

        let default_store = config
            .get_str("cache.default")
            .unwrap_or("memory")
            .to_string();
        if !configs.contains_key(&default_store) {
            return Err(CacheError::Configuration(format!(
                "cache.default names unknown store {:?}",
                default_store
            )));
        }

        let manager = Self {
            drivers: RwLock::new(AHashMap::default()),
            configs,
            instances: RwLock::new(AHashMap::default()),
            default_store,
            events,
            container,
        };
        manager.register_builtin_drivers();
        Ok(manager)
    }

    fn register_builtin_drivers(&self) {
        self.register_driver(
            "memory",
            DriverSpec::new(|_config, _container| Ok(Arc::new(MemoryStore::new()) as Arc<dyn Store>)),
        );

        self.register_driver(
            "file",
            DriverSpec::new(|config, _container| {
                let root = config
                    .get("root")
                    .and_then(Value::as_str)
                    .expect("checked by required keys");
                Ok(Arc::new(FileStore::new(root)) as Arc<dyn Store>)
            })
            .require(&["root"])
            .validate(|config| {
                match config.get("root").and_then(Value::as_str) {
                    Some(root) if !root.is_empty() => Ok(()),
                    _ => Err(CacheError::Configuration(
                        "file driver root must be a non-empty string".to_string(),
                    )),
                }
            }),
        );

        self.register_driver(
            "remote",
            DriverSpec::new(|config, _container| {
                let addr = config
                    .get("addr")
                    .and_then(Value::as_str)
                    .expect("checked by required keys");
                let prefix = config
                    .get("prefix")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                Ok(Arc::new(RemoteStore::new(addr, prefix)) as Arc<dyn Store>)
            })
            .require(&["addr"]),
        );
    }

    /// Registers (or replaces) a driver under `name`.
    pub fn register_driver(&self, name: &str, spec: DriverSpec) {
        self.drivers
            .write()
            .expect("driver registry poisoned")
            .insert(name.to_string(), Arc::new(spec));
    }

    /// Removes a driver registration; existing store instances survive.
    pub fn unregister_driver(&self, name: &str) -> bool {
        self.drivers
            .write()
            .expect("driver registry poisoned")
            .remove(name)
            .is_some()
    }

    pub fn default_store_name(&self) -> &str {
        &self.default_store
    }

    /// Resolves a store repository by name, or the default when `None`.
    /// Instances are built once and cached.
    pub fn store(&self, name: Option<&str>) -> Result<Repository, CacheError> {
        let name = name.unwrap_or(&self.default_store);
        if let Some(repo) = self
            .instances
            .read()
            .expect("store instances poisoned")
            .get(name)
        {
            return Ok(repo.clone());
        }

        let user_config = self
            .configs
            .get(name)
            .ok_or_else(|| CacheError::UnknownStore(name.to_string()))?
            .clone();
        let driver_name = user_config
            .get("driver")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                CacheError::Configuration(format!("store {:?} has no driver key", name))
            })?
            .to_string();
        let spec = self
            .drivers
            .read()
            .expect("driver registry poisoned")
            .get(&driver_name)
            .cloned()
            .ok_or_else(|| CacheError::UnknownDriver(driver_name.clone()))?;

        let final_config = match &spec.config_builder {
            Some(builder) => builder(user_config, &self.container)?,
            None => user_config,
        };

        let missing: Vec<String> = spec
            .required
            .iter()
            .filter(|key| !final_config.contains_key(*key))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(CacheError::MissingConfig {
                driver: driver_name,
                keys: missing,
            });
        }

        if let Some(validator) = &spec.validator {
            validator(&final_config).map_err(|e| {
                if e.is_configuration() {
                    e
                } else {
                    CacheError::Configuration(e.to_string())
                }
            })?;
        }

        let store = (spec.factory)(&final_config, &self.container)?;
        let repo = Repository::new(name.to_string(), store, self.events.clone());
        self.instances
            .write()
            .expect("store instances poisoned")
            .insert(name.to_string(), repo.clone());
        Ok(repo)
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("default", &self.default_store)
            .field("stores", &self.configs.keys().collect::<Vec<_>>())
            .finish()
    }
}
