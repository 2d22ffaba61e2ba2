//! Filesystem cache driver.
//!
//! Keys are SHA-1 hashed and sharded two levels deep:
//! `<root>/<hash[0..2]>/<hash[2..4]>/<hash>`. The first line of each file
//! is the expiry epoch in seconds (a far-future sentinel for "forever");
//! the remainder is the raw value. A JSON index file maps hashes back to
//! the original keys so `get_all_keys` can answer with caller-visible
//! names.

use crate::cache::drivers::{Store, StoreLock};
use crate::cache::CacheError;
use ahash::HashMap as AHashMap;
use async_trait::async_trait;
use sha1::{Digest, Sha1};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

/// Expiry sentinel for entries stored forever.
const FOREVER_EPOCH: u64 = 9_999_999_999;

const INDEX_FILE: &str = "index.json";
const LOCK_DIR: &str = ".locks";

fn hash_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn expiry_epoch(ttl: Option<Duration>) -> u64 {
    match ttl {
        Some(ttl) => now_epoch().saturating_add(ttl.as_secs().max(1)),
        None => FOREVER_EPOCH,
    }
}

/// Disk-backed store rooted at a configured directory.
pub struct FileStore {
    root: PathBuf,
    // Guards the hash → original-key index across concurrent writers.
    index: Mutex<Option<AHashMap<String, String>>>,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index: Mutex::new(None),
        }
    }

    fn entry_path(&self, hash: &str) -> PathBuf {
        self.root.join(&hash[0..2]).join(&hash[2..4]).join(hash)
    }

    fn lock_path(&self, name: &str) -> PathBuf {
        self.root.join(LOCK_DIR).join(hash_key(name))
    }

    async fn load_index(
        &self,
        guard: &mut tokio::sync::MutexGuard<'_, Option<AHashMap<String, String>>>,
    ) -> Result<(), CacheError> {
        if guard.is_some() {
            return Ok(());
        }
        let path = self.root.join(INDEX_FILE);
        let index = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| CacheError::Serialization(format!("corrupt cache index: {}", e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => AHashMap::default(),
            Err(e) => return Err(e.into()),
        };
        **guard = Some(index);
        Ok(())
    }

    async fn update_index<F>(&self, mutate: F) -> Result<(), CacheError>
    where
        F: FnOnce(&mut AHashMap<String, String>),
    {
        let mut guard = self.index.lock().await;
        self.load_index(&mut guard).await?;
        let index = guard.as_mut().expect("index loaded above");
        mutate(index);
        let bytes = serde_json::to_vec(index)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(self.root.join(INDEX_FILE), bytes).await?;
        Ok(())
    }

    /// Reads an entry, removing it when expired. Returns value and expiry.
    async fn read_entry(&self, key: &str) -> Result<Option<(Vec<u8>, u64)>, CacheError> {
        let hash = hash_key(key);
        let path = self.entry_path(&hash);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let newline = bytes.iter().position(|&b| b == b'\n').unwrap_or(bytes.len());
        let expiry: u64 = std::str::from_utf8(&bytes[..newline])
            .ok()
            .and_then(|line| line.trim().parse().ok())
            .unwrap_or(0);

        if expiry <= now_epoch() {
            let _ = tokio::fs::remove_file(&path).await;
            self.update_index(|index| {
                index.remove(&hash);
            })
            .await?;
            return Ok(None);
        }

        let value = bytes[(newline + 1).min(bytes.len())..].to_vec();
        Ok(Some((value, expiry)))
    }

    async fn write_entry(&self, key: &str, value: &[u8], expiry: u64) -> Result<(), CacheError> {
        let hash = hash_key(key);
        let path = self.entry_path(&hash);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut contents = Vec::with_capacity(value.len() + 12);
        contents.extend_from_slice(expiry.to_string().as_bytes());
        contents.push(b'\n');
        contents.extend_from_slice(value);
        tokio::fs::write(&path, contents).await?;
        self.update_index(|index| {
            index.insert(hash, key.to_string());
        })
        .await
    }
}

#[async_trait]
impl Store for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.read_entry(key).await?.map(|(value, _)| value))
    }

    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.write_entry(key, &value, expiry_epoch(ttl)).await
    }

    async fn add(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        if self.read_entry(key).await?.is_some() {
            return Ok(false);
        }
        self.write_entry(key, &value, expiry_epoch(ttl)).await?;
        Ok(true)
    }

    async fn forget(&self, key: &str) -> Result<bool, CacheError> {
        let hash = hash_key(key);
        let path = self.entry_path(&hash);
        let removed = match tokio::fs::remove_file(&path).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        if removed {
            self.update_index(|index| {
                index.remove(&hash);
            })
            .await?;
        }
        Ok(removed)
    }

    async fn flush(&self) -> Result<(), CacheError> {
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            // Keep lock files; flush only clears cache entries.
            if name == LOCK_DIR {
                continue;
            }
            let path = entry.path();
            if path.is_dir() {
                tokio::fs::remove_dir_all(&path).await?;
            } else {
                tokio::fs::remove_file(&path).await?;
            }
        }
        let mut guard = self.index.lock().await;
        *guard = Some(AHashMap::default());
        Ok(())
    }

    async fn increment(&self, key: &str, by: i64) -> Result<i64, CacheError> {
        let (current, expiry) = match self.read_entry(key).await? {
            Some((value, expiry)) => {
                let parsed = std::str::from_utf8(&value)
                    .ok()
                    .and_then(|s| s.trim().parse::<i64>().ok())
                    .ok_or_else(|| {
                        CacheError::Serialization(format!("key {:?} is not numeric", key))
                    })?;
                (parsed, expiry)
            }
            None => (0, FOREVER_EPOCH),
        };
        let next = current + by;
        self.write_entry(key, next.to_string().as_bytes(), expiry)
            .await?;
        Ok(next)
    }

    async fn decrement(&self, key: &str, by: i64) -> Result<i64, CacheError> {
        self.increment(key, -by).await
    }

    async fn get_all_keys(&self) -> Result<Vec<String>, CacheError> {
        let snapshot: Vec<(String, String)> = {
            let mut guard = self.index.lock().await;
            self.load_index(&mut guard).await?;
            guard
                .as_ref()
                .expect("index loaded above")
                .iter()
                .map(|(hash, key)| (hash.clone(), key.clone()))
                .collect()
        };

        let mut keys = Vec::with_capacity(snapshot.len());
        for (_, key) in snapshot {
            if self.read_entry(&key).await?.is_some() {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    fn make_lock(&self, name: &str, ttl: Duration, owner: String) -> Arc<dyn StoreLock> {
        Arc::new(FileLock {
            path: self.lock_path(name),
            name: name.to_string(),
            ttl,
            owner,
        })
    }
}

struct FileLock {
    path: PathBuf,
    name: String,
    ttl: Duration,
    owner: String,
}

impl FileLock {
    fn payload(&self) -> String {
        let expiry = if self.ttl.is_zero() {
            FOREVER_EPOCH
        } else {
            now_epoch().saturating_add(self.ttl.as_secs().max(1))
        };
        format!("{}\n{}", self.owner, expiry)
    }

    async fn read_state(path: &Path) -> Option<(String, u64)> {
        let contents = tokio::fs::read_to_string(path).await.ok()?;
        let mut lines = contents.lines();
        let owner = lines.next()?.to_string();
        let expiry = lines.next()?.trim().parse().ok()?;
        Some((owner, expiry))
    }
}

#[async_trait]
impl StoreLock for FileLock {
    fn name(&self) -> &str {
        &self.name
    }

    fn owner(&self) -> &str {
        &self.owner
    }

    async fn acquire(&self) -> Result<bool, CacheError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .await
        {
            Ok(_) => {
                tokio::fs::write(&self.path, self.payload()).await?;
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                match Self::read_state(&self.path).await {
                    Some((_, expiry)) if expiry > now_epoch() => Ok(false),
                    // Stale or unreadable lock; take it over.
                    _ => {
                        tokio::fs::write(&self.path, self.payload()).await?;
                        Ok(true)
                    }
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn release(&self) -> Result<bool, CacheError> {
        match Self::read_state(&self.path).await {
            Some((owner, _)) if owner == self.owner => {
                tokio::fs::remove_file(&self.path).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn force_release(&self) -> Result<(), CacheError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sharded_layout_follows_hash_prefix() {
        let store = FileStore::new("/cache");
        let hash = hash_key("user:1");
        let path = store.entry_path(&hash);
        let expected = Path::new("/cache")
            .join(&hash[0..2])
            .join(&hash[2..4])
            .join(&hash);
        assert_eq!(path, expected);
    }

    #[tokio::test]
    async fn round_trip_and_original_key_listing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        store.put("alpha", b"1".to_vec(), None).await.unwrap();
        store
            .put("beta", b"2".to_vec(), Some(Duration::from_secs(60)))
            .await
            .unwrap();

        assert_eq!(store.get("alpha").await.unwrap(), Some(b"1".to_vec()));

        let mut keys = store.get_all_keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["alpha".to_string(), "beta".to_string()]);
    }

    #[tokio::test]
    async fn expired_entries_are_removed_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        // Write an entry whose expiry is already in the past.
        store.write_entry("old", b"v", now_epoch() - 10).await.unwrap();
        assert_eq!(store.get("old").await.unwrap(), None);
        assert!(store.get_all_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_locks_respect_owners() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let lock_a = store.make_lock("sync", Duration::from_secs(30), "a".to_string());
        let lock_b = store.make_lock("sync", Duration::from_secs(30), "b".to_string());

        assert!(lock_a.acquire().await.unwrap());
        assert!(!lock_b.acquire().await.unwrap());
        assert!(!lock_b.release().await.unwrap());
        assert!(lock_a.release().await.unwrap());
        assert!(lock_b.acquire().await.unwrap());
    }
}
