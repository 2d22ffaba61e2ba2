//! High-level cache facade over a [`Store`] driver.
//!
//! The repository adds JSON serialization, TTL arithmetic (a zero TTL means
//! "forever"), cache events, and the `remember`/`pull` composites. It is
//! cheap to clone; clones share the underlying driver.

use crate::cache::drivers::Store;
use crate::cache::lock::Lock;
use crate::cache::tagged::TaggedCache;
use crate::cache::CacheError;
use crate::engine::events::{Event, EventBus};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct Repository {
    store_name: String,
    store: Arc<dyn Store>,
    events: Arc<EventBus>,
    pub(crate) prefix: String,
}

impl Repository {
    pub(crate) fn new(store_name: String, store: Arc<dyn Store>, events: Arc<EventBus>) -> Self {
        Self {
            store_name,
            store,
            events,
            prefix: String::new(),
        }
    }

    /// Derived repository whose keys are namespaced; used by tagged caches.
    pub(crate) fn with_prefix(&self, prefix: String) -> Self {
        Self {
            store_name: self.store_name.clone(),
            store: self.store.clone(),
            events: self.events.clone(),
            prefix,
        }
    }

    pub fn store_name(&self) -> &str {
        &self.store_name
    }

    /// The underlying driver.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn emit(&self, event: Event) {
        self.events.emit(&event);
    }

    fn hit(&self, key: &str) {
        self.emit(Event::CacheHit {
            store: self.store_name.clone(),
            key: key.to_string(),
        });
    }

    fn miss(&self, key: &str) {
        self.emit(Event::CacheMiss {
            store: self.store_name.clone(),
            key: key.to_string(),
        });
    }

    fn wrote(&self, key: &str) {
        self.emit(Event::CacheWrite {
            store: self.store_name.clone(),
            key: key.to_string(),
        });
    }

    fn forgot(&self, key: &str) {
        self.emit(Event::CacheForget {
            store: self.store_name.clone(),
            key: key.to_string(),
        });
    }

    fn ttl_option(ttl: Duration) -> Option<Duration> {
        if ttl.is_zero() {
            None
        } else {
            Some(ttl)
        }
    }

    /// Fetches and deserializes `key`. Emits `CacheHit` or `CacheMiss`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.store.get(&self.full_key(key)).await? {
            Some(bytes) => {
                self.hit(key);
                let value = serde_json::from_slice(&bytes).map_err(|e| {
                    CacheError::Serialization(format!("key {:?}: {}", key, e))
                })?;
                Ok(Some(value))
            }
            None => {
                self.miss(key);
                Ok(None)
            }
        }
    }

    /// Stores `value` for `ttl`; a zero duration stores forever.
    pub async fn put<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let bytes =
            serde_json::to_vec(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.store
            .put(&self.full_key(key), bytes, Self::ttl_option(ttl))
            .await?;
        self.wrote(key);
        Ok(())
    }

    /// Put-if-absent; true when the write happened.
    pub async fn add<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let bytes =
            serde_json::to_vec(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
        let added = self
            .store
            .add(&self.full_key(key), bytes, Self::ttl_option(ttl))
            .await?;
        if added {
            self.wrote(key);
        }
        Ok(added)
    }

    /// Stores `value` with no expiry.
    pub async fn forever<T: Serialize>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        self.put(key, value, Duration::ZERO).await
    }

    /// Removes `key`; true when an entry was removed.
    pub async fn forget(&self, key: &str) -> Result<bool, CacheError> {
        let removed = self.store.forget(&self.full_key(key)).await?;
        if removed {
            self.forgot(key);
        }
        Ok(removed)
    }

    /// Clears the whole store.
    pub async fn flush(&self) -> Result<(), CacheError> {
        self.store.flush().await
    }

    /// Fetches several keys; the result aligns with the input order.
    pub async fn many<T: DeserializeOwned>(
        &self,
        keys: &[&str],
    ) -> Result<Vec<Option<T>>, CacheError> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    /// Stores several entries with one TTL. Not atomic across keys unless
    /// the driver advertises atomicity.
    pub async fn put_many<T: Serialize>(
        &self,
        entries: &[(&str, T)],
        ttl: Duration,
    ) -> Result<(), CacheError> {
        for (key, value) in entries {
            self.put(key, value, ttl).await?;
        }
        Ok(())
    }

    pub async fn increment(&self, key: &str, by: i64) -> Result<i64, CacheError> {
        let value = self.store.increment(&self.full_key(key), by).await?;
        self.wrote(key);
        Ok(value)
    }

    pub async fn decrement(&self, key: &str, by: i64) -> Result<i64, CacheError> {
        let value = self.store.decrement(&self.full_key(key), by).await?;
        self.wrote(key);
        Ok(value)
    }

    /// Fetches and removes `key` in one call.
    pub async fn pull<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let value = self.get(key).await?;
        if value.is_some() {
            self.forget(key).await?;
        }
        Ok(value)
    }

    /// Returns the cached value or produces, stores, and returns it.
    ///
    /// Concurrent callers may both invoke the producer unless the driver is
    /// atomic; wrap with [`Repository::lock`] for single-flight semantics.
    pub async fn remember<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        producer: F,
    ) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if let Some(value) = self.get(key).await? {
            return Ok(value);
        }
        let value = producer().await;
        self.put(key, &value, ttl).await?;
        Ok(value)
    }

    /// [`Repository::remember`] with no expiry.
    pub async fn remember_forever<T, F, Fut>(&self, key: &str, producer: F) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.remember(key, Duration::ZERO, producer).await
    }

    /// Alias for [`Repository::remember_forever`].
    pub async fn sear<T, F, Fut>(&self, key: &str, producer: F) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.remember_forever(key, producer).await
    }

    /// Scopes reads and writes to the given tag set.
    pub fn tags(&self, names: &[&str]) -> TaggedCache {
        TaggedCache::new(self.clone(), names)
    }

    /// Creates a lock with a random owner id.
    pub fn lock(&self, name: &str, ttl: Duration) -> Lock {
        self.lock_with_owner(name, ttl, uuid::Uuid::new_v4().simple().to_string())
    }

    /// Creates a lock owned by `owner`; matching owners can release each
    /// other's handle.
    pub fn lock_with_owner(&self, name: &str, ttl: Duration, owner: String) -> Lock {
        Lock::new(self.store.make_lock(name, ttl, owner))
    }

    // Raw, event-free accessors used internally for tag bookkeeping.

    pub(crate) async fn raw_get_string(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self
            .store
            .get(key)
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    pub(crate) async fn raw_put_string_forever(
        &self,
        key: &str,
        value: &str,
    ) -> Result<(), CacheError> {
        self.store
            .put(key, value.as_bytes().to_vec(), None)
            .await
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("store", &self.store_name)
            .field("prefix", &self.prefix)
            .finish()
    }
}
