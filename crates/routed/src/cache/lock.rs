//! Caller-facing cooperative lock handle.

use crate::cache::drivers::StoreLock;
use crate::cache::CacheError;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A cooperative mutual-exclusion handle tied to a cache store.
///
/// # Examples
///
/// ```no_run
/// # async fn demo(repo: routed::cache::repository::Repository) -> Result<(), routed::cache::CacheError> {
/// let lock = repo.lock("reports:rebuild", std::time::Duration::from_secs(30));
/// if let Some(count) = lock.get(|| async { 42 }).await? {
///     // we held the lock while producing `count`
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Lock {
    inner: Arc<dyn StoreLock>,
}

impl Lock {
    pub(crate) fn new(inner: Arc<dyn StoreLock>) -> Self {
        Self { inner }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn owner(&self) -> &str {
        self.inner.owner()
    }

    /// Attempts the grab once; false on contention.
    pub async fn acquire(&self) -> Result<bool, CacheError> {
        self.inner.acquire().await
    }

    /// Releases the lock if this owner holds it.
    pub async fn release(&self) -> Result<bool, CacheError> {
        self.inner.release().await
    }

    /// Clears the lock regardless of owner.
    pub async fn force_release(&self) -> Result<(), CacheError> {
        self.inner.force_release().await
    }

    /// Retries `acquire` at the driver interval until success or `timeout`.
    pub async fn block(&self, timeout: Duration) -> Result<(), CacheError> {
        let started = Instant::now();
        let interval = self.inner.retry_interval();
        loop {
            if self.inner.acquire().await? {
                return Ok(());
            }
            if started.elapsed() + interval >= timeout {
                return Err(CacheError::LockTimeout {
                    name: self.inner.name().to_string(),
                    waited: timeout,
                });
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Blocks up to `timeout`, runs `f` holding the lock, releases after.
    pub async fn block_on<F, Fut, T>(&self, timeout: Duration, f: F) -> Result<T, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.block(timeout).await?;
        let result = f().await;
        self.inner.release().await?;
        Ok(result)
    }

    /// Runs `f` if the lock can be grabbed immediately, releasing on any
    /// exit; `None` when the lock was contended.
    pub async fn get<F, Fut, T>(&self, f: F) -> Result<Option<T>, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if !self.inner.acquire().await? {
            return Ok(None);
        }
        let result = f().await;
        self.inner.release().await?;
        Ok(Some(result))
    }
}

impl std::fmt::Debug for Lock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lock")
            .field("name", &self.name())
            .field("owner", &self.owner())
            .finish()
    }
}
