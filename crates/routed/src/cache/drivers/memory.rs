//! In-memory (array) cache driver.

use crate::cache::drivers::{Store, StoreLock};
use crate::cache::CacheError;
use ahash::HashMap as AHashMap;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

#[derive(Debug)]
struct LockState {
    owner: String,
    expires_at: Option<Instant>,
}

/// Process-local store guarded by a single mutex.
///
/// Expired entries are removed lazily when touched by a read. All
/// read-modify-write operations run under the one mutex, so the driver
/// advertises atomicity.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<AHashMap<String, Entry>>,
    locks: Arc<Mutex<AHashMap<String, LockState>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, AHashMap<String, Entry>> {
        self.entries.lock().expect("memory store lock poisoned")
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries();
        match entries.get(key) {
            Some(entry) if entry.expired(now) => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries()
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn add(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries();
        let live = entries.get(key).map(|e| !e.expired(now)).unwrap_or(false);
        if live {
            return Ok(false);
        }
        let expires_at = ttl.map(|ttl| now + ttl);
        entries.insert(key.to_string(), Entry { value, expires_at });
        Ok(true)
    }

    async fn forget(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries().remove(key).is_some())
    }

    async fn flush(&self) -> Result<(), CacheError> {
        self.entries().clear();
        Ok(())
    }

    async fn increment(&self, key: &str, by: i64) -> Result<i64, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries();
        let current = match entries.get(key) {
            Some(entry) if !entry.expired(now) => {
                std::str::from_utf8(&entry.value)
                    .ok()
                    .and_then(|s| s.trim().parse::<i64>().ok())
                    .ok_or_else(|| {
                        CacheError::Serialization(format!("key {:?} is not numeric", key))
                    })?
            }
            _ => 0,
        };
        let next = current + by;
        let expires_at = entries.get(key).and_then(|e| e.expires_at);
        entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string().into_bytes(),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn decrement(&self, key: &str, by: i64) -> Result<i64, CacheError> {
        self.increment(key, -by).await
    }

    async fn get_all_keys(&self) -> Result<Vec<String>, CacheError> {
        let now = Instant::now();
        Ok(self
            .entries()
            .iter()
            .filter(|(_, entry)| !entry.expired(now))
            .map(|(key, _)| key.clone())
            .collect())
    }

    fn make_lock(&self, name: &str, ttl: Duration, owner: String) -> Arc<dyn StoreLock> {
        Arc::new(MemoryLock {
            table: self.locks.clone(),
            name: name.to_string(),
            ttl,
            owner,
        })
    }

    fn is_atomic(&self) -> bool {
        true
    }
}

struct MemoryLock {
    table: Arc<Mutex<AHashMap<String, LockState>>>,
    name: String,
    ttl: Duration,
    owner: String,
}

#[async_trait]
impl StoreLock for MemoryLock {
    fn name(&self) -> &str {
        &self.name
    }

    fn owner(&self) -> &str {
        &self.owner
    }

    async fn acquire(&self) -> Result<bool, CacheError> {
        let now = Instant::now();
        let mut table = self.table.lock().expect("lock table poisoned");
        let live = table
            .get(&self.name)
            .map(|state| state.expires_at.map(|at| at > now).unwrap_or(true))
            .unwrap_or(false);
        if live {
            return Ok(false);
        }
        let expires_at = if self.ttl.is_zero() {
            None
        } else {
            Some(now + self.ttl)
        };
        table.insert(
            self.name.clone(),
            LockState {
                owner: self.owner.clone(),
                expires_at,
            },
        );
        Ok(true)
    }

    async fn release(&self) -> Result<bool, CacheError> {
        let mut table = self.table.lock().expect("lock table poisoned");
        match table.get(&self.name) {
            Some(state) if state.owner == self.owner => {
                table.remove(&self.name);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn force_release(&self) -> Result<(), CacheError> {
        self.table
            .lock()
            .expect("lock table poisoned")
            .remove(&self.name);
        Ok(())
    }

    fn retry_interval(&self) -> Duration {
        Duration::from_millis(50)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expired_entries_read_as_miss() {
        let store = MemoryStore::new();
        store
            .put("k", b"v".to_vec(), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn add_respects_live_entries() {
        let store = MemoryStore::new();
        assert!(store.add("k", b"1".to_vec(), None).await.unwrap());
        assert!(!store.add("k", b"2".to_vec(), None).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some(b"1".to_vec()));
    }

    #[tokio::test]
    async fn increment_initialises_missing_keys() {
        let store = MemoryStore::new();
        assert_eq!(store.increment("count", 5).await.unwrap(), 5);
        assert_eq!(store.increment("count", 2).await.unwrap(), 7);
        assert_eq!(store.decrement("count", 3).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn lock_contention_and_owner_release() {
        let store = MemoryStore::new();
        let lock_a = store.make_lock("job", Duration::from_secs(10), "a".to_string());
        let lock_b = store.make_lock("job", Duration::from_secs(10), "b".to_string());

        assert!(lock_a.acquire().await.unwrap());
        assert!(!lock_b.acquire().await.unwrap());

        // Wrong owner cannot release.
        assert!(!lock_b.release().await.unwrap());
        assert!(lock_a.release().await.unwrap());
        assert!(lock_b.acquire().await.unwrap());
    }

    #[tokio::test]
    async fn force_release_ignores_owner() {
        let store = MemoryStore::new();
        let lock_a = store.make_lock("job", Duration::from_secs(10), "a".to_string());
        let lock_b = store.make_lock("job", Duration::from_secs(10), "b".to_string());

        assert!(lock_a.acquire().await.unwrap());
        lock_b.force_release().await.unwrap();
        assert!(lock_b.acquire().await.unwrap());
    }
}
