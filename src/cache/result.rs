//! TTL result cache for read-class calls.
//!
//! [`ResultCache`] stores JSON results keyed on
//! [`CallDescriptor::cache_key`](crate::CallDescriptor::cache_key). Each entry
//! carries its own TTL, fixed at insert time; a stale entry reads as absent
//! even before it is physically removed. Capacity is bounded with LRU
//! eviction.
//!
//! # Sweeping
//!
//! moka evicts stale entries opportunistically while the cache is in use.
//! An idle cache keeps them until the next access, so
//! [`ResultCache::spawn_sweeper`] starts a periodic maintenance task whose
//! lifetime is bound to the returned [`SweeperHandle`].
//!
//! # Concurrent misses
//!
//! [`ResultCache::get_or_try_insert_with`] coalesces concurrent loads of the
//! same key: one caller runs the loader, the rest wait for its result. A
//! failed load caches nothing and every waiter receives the error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::Expiry;
use moka::future::Cache;
use moka::policy::EvictionPolicy;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::{HuginnError, Result};

/// Configuration for the result cache.
///
/// ```rust
/// # use huginn::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .max_entries(50_000)
///     .default_ttl(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached entries. Default: 10,000.
    pub max_entries: u64,
    /// TTL for calls that do not set their own. Default: 30s.
    pub default_ttl: Duration,
    /// Period of the background sweep. Default: 60s.
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            default_ttl: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of cached entries.
    pub fn max_entries(mut self, n: u64) -> Self {
        self.max_entries = n;
        self
    }

    /// Set the default TTL.
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set the sweep period.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    ttl: Duration,
}

/// Expires each entry `ttl` after its last write.
struct PerEntryTtl;

impl Expiry<String, CacheEntry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// Shared in-memory result cache.
///
/// Cloning yields another handle to the same storage.
#[derive(Clone)]
pub struct ResultCache {
    cache: Cache<String, CacheEntry>,
    default_ttl: Duration,
}

impl ResultCache {
    /// Create a cache with the given configuration.
    pub fn new(config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_entries)
            .eviction_policy(EvictionPolicy::lru())
            .expire_after(PerEntryTtl)
            .support_invalidation_closures()
            .build();
        Self {
            cache,
            default_ttl: config.default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Look up a live entry.
    pub async fn get(&self, key: &str) -> Option<Value> {
        self.cache.get(key).await.map(|entry| entry.value)
    }

    /// Store `value` under `key`, overwriting any previous entry.
    ///
    /// `None` uses the default TTL.
    pub async fn set(&self, key: impl Into<String>, value: Value, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        self.cache
            .insert(key.into(), CacheEntry { value, ttl })
            .await;
    }

    /// Return the live entry for `key`, or run `load` once across all
    /// concurrent callers and cache its success.
    ///
    /// The flag is `true` when the value came from an existing entry.
    pub async fn get_or_try_insert_with<F>(
        &self,
        key: String,
        ttl: Option<Duration>,
        load: F,
    ) -> Result<(Value, bool)>
    where
        F: Future<Output = Result<Value>>,
    {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let entry = self
            .cache
            .entry(key)
            .or_try_insert_with(async move { load.await.map(|value| CacheEntry { value, ttl }) })
            .await
            .map_err(|shared: Arc<HuginnError>| (*shared).clone())?;
        let hit = !entry.is_fresh();
        Ok((entry.into_value().value, hit))
    }

    /// Remove every entry whose key contains `pattern`.
    ///
    /// Removal is applied lazily by moka; matching entries read as absent
    /// immediately.
    pub fn invalidate(&self, pattern: &str) -> Result<()> {
        let pattern = pattern.to_owned();
        debug!(%pattern, "invalidating cache entries");
        self.cache
            .invalidate_entries_if(move |key, _| key.contains(&pattern))
            .map(|_| ())
            .map_err(|e| HuginnError::Configuration(format!("cache invalidation failed: {e}")))
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    /// Approximate number of entries. Call [`sync`](Self::sync) first for
    /// an up-to-date count.
    pub fn len(&self) -> u64 {
        self.cache.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply pending evictions, expirations and invalidations.
    pub async fn sync(&self) {
        self.cache.run_pending_tasks().await;
    }

    /// Start a task that sweeps stale entries every `interval`.
    ///
    /// The task stops when the handle is stopped or dropped.
    ///
    /// # Panics
    ///
    /// Must be called within a tokio runtime.
    pub fn spawn_sweeper(&self, interval: Duration) -> SweeperHandle {
        let cache = self.cache.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cache.run_pending_tasks().await;
                trace!(entries = cache.entry_count(), "cache sweep");
            }
        });
        SweeperHandle { task }
    }
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("entries", &self.cache.entry_count())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

/// Lifetime of a background sweep task.
#[derive(Debug)]
pub struct SweeperHandle {
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop sweeping.
    pub fn stop(self) {
        self.task.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Reassemble a batch from per-item cache lookups and the loaded misses.
///
/// `loaded` holds one value per `None` in `cached`, in order.
pub(crate) fn merge_batch_results(
    cached: Vec<Option<Value>>,
    loaded: Vec<Value>,
) -> Result<Vec<Value>> {
    let mut loaded = loaded.into_iter();
    cached
        .into_iter()
        .map(|hit| match hit {
            Some(value) => Ok(value),
            None => loaded.next().ok_or(HuginnError::EmptyResponse),
        })
        .collect()
}
