//! Tag-scoped cache views.
//!
//! Every tag name owns an opaque identifier stored under a reserved
//! `tag:<name>:key` entry. A tag set's namespace is its identifiers joined
//! with `|`; entry keys are prefixed with a digest of that namespace.
//! Flushing rotates identifiers, which changes the prefix and makes every
//! entry written under the old namespace invisible — the entries themselves
//! are left for the driver to expire.

use crate::cache::lock::Lock;
use crate::cache::repository::Repository;
use crate::cache::CacheError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha1::{Digest, Sha1};
use std::future::Future;
use std::time::Duration;

fn tag_key(name: &str) -> String {
    format!("tag:{}:key", name)
}

fn fresh_tag_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// A cache view scoped to an ordered set of tags.
#[derive(Debug, Clone)]
pub struct TaggedCache {
    repo: Repository,
    tags: Vec<String>,
}

impl TaggedCache {
    pub(crate) fn new(repo: Repository, names: &[&str]) -> Self {
        Self {
            repo,
            tags: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.tags
    }

    /// Current identifier for `name`, creating one on first use.
    async fn tag_id(&self, name: &str) -> Result<String, CacheError> {
        let key = tag_key(name);
        if let Some(id) = self.repo.raw_get_string(&key).await? {
            return Ok(id);
        }
        let id = fresh_tag_id();
        self.repo.raw_put_string_forever(&key, &id).await?;
        Ok(id)
    }

    /// `id1|id2|...` for the tag set, in declaration order.
    pub async fn namespace(&self) -> Result<String, CacheError> {
        let mut ids = Vec::with_capacity(self.tags.len());
        for name in &self.tags {
            ids.push(self.tag_id(name).await?);
        }
        Ok(ids.join("|"))
    }

    /// Repository view whose keys carry the namespace prefix.
    async fn scoped(&self) -> Result<Repository, CacheError> {
        let namespace = self.namespace().await?;
        let mut hasher = Sha1::new();
        hasher.update(namespace.as_bytes());
        let digest = hex::encode(hasher.finalize());
        Ok(self.repo.with_prefix(format!("tagged:{}:", &digest[..20])))
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        self.scoped().await?.get(key).await
    }

    pub async fn put<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.scoped().await?.put(key, value, ttl).await
    }

    pub async fn add<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        self.scoped().await?.add(key, value, ttl).await
    }

    pub async fn forever<T: Serialize>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        self.scoped().await?.forever(key, value).await
    }

    pub async fn forget(&self, key: &str) -> Result<bool, CacheError> {
        self.scoped().await?.forget(key).await
    }

    pub async fn increment(&self, key: &str, by: i64) -> Result<i64, CacheError> {
        self.scoped().await?.increment(key, by).await
    }

    pub async fn decrement(&self, key: &str, by: i64) -> Result<i64, CacheError> {
        self.scoped().await?.decrement(key, by).await
    }

    pub async fn pull<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        self.scoped().await?.pull(key).await
    }

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
        self.scoped().await?.remember(key, ttl, producer).await
    }

    pub async fn remember_forever<T, F, Fut>(&self, key: &str, producer: F) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.scoped().await?.remember_forever(key, producer).await
    }

    /// Lock scoped to this tag set's store.
    pub fn lock(&self, name: &str, ttl: Duration) -> Lock {
        self.repo.lock(name, ttl)
    }

    /// Rotates every identifier in the set, invalidating all entries
    /// written under the current namespace.
    pub async fn flush(&self) -> Result<(), CacheError> {
        for name in &self.tags {
            self.rotate(name).await?;
        }
        Ok(())
    }

    /// Rotates a single tag's identifier.
    pub async fn flush_tag(&self, name: &str) -> Result<(), CacheError> {
        if !self.tags.iter().any(|t| t == name) {
            return Err(CacheError::Configuration(format!(
                "tag {:?} is not part of this tag set",
                name
            )));
        }
        self.rotate(name).await
    }

    async fn rotate(&self, name: &str) -> Result<(), CacheError> {
        self.repo
            .raw_put_string_forever(&tag_key(name), &fresh_tag_id())
            .await
    }
}
