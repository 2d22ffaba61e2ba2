//! Low-level cache driver contracts.
//!
//! A [`Store`] exposes byte-oriented key/value operations; the
//! [`crate::cache::repository::Repository`] facade layers serialization,
//! TTL arithmetic, and events on top. Drivers must be safe to share across
//! request tasks.

pub mod file;
pub mod memory;
pub mod remote;

use crate::cache::CacheError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Byte-oriented cache driver operations.
///
/// A `ttl` of `None` stores the entry forever. `add` is put-if-absent and
/// reports whether the write happened. `increment`/`decrement` treat the
/// stored bytes as a decimal integer, initialising missing keys to the
/// delta.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>)
        -> Result<(), CacheError>;

    async fn add(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>)
        -> Result<bool, CacheError>;

    async fn forget(&self, key: &str) -> Result<bool, CacheError>;

    async fn flush(&self) -> Result<(), CacheError>;

    async fn increment(&self, key: &str, by: i64) -> Result<i64, CacheError>;

    async fn decrement(&self, key: &str, by: i64) -> Result<i64, CacheError>;

    /// Original (caller-visible) keys currently live in the store.
    async fn get_all_keys(&self) -> Result<Vec<String>, CacheError>;

    /// Creates a cooperative lock handle bound to this store.
    fn make_lock(&self, name: &str, ttl: Duration, owner: String) -> Arc<dyn StoreLock>;

    /// Whether read-modify-write and multi-key operations are atomic.
    fn is_atomic(&self) -> bool {
        false
    }
}

/// Driver-side lock primitive; see [`crate::cache::lock::Lock`] for the
/// caller-facing handle with blocking helpers.
#[async_trait]
pub trait StoreLock: Send + Sync {
    fn name(&self) -> &str;

    fn owner(&self) -> &str;

    /// Attempts the grab; false on contention.
    async fn acquire(&self) -> Result<bool, CacheError>;

    /// Releases only when held by this owner; reports whether it released.
    async fn release(&self) -> Result<bool, CacheError>;

    /// Clears the lock regardless of owner.
    async fn force_release(&self) -> Result<(), CacheError>;

    /// Sleep interval between blocking acquisition attempts.
    fn retry_interval(&self) -> Duration {
        Duration::from_millis(100)
    }
}
