//! Typed tenant cache with degraded-mode fallback.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::key::{KeyBuilder, DASHBOARD, RECORDS};
use super::memory::MemoryCache;
use super::{CacheBackend, CacheError};
use crate::domain::TenantId;

/// Backend currently serving cache operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Redis is configured and healthy.
    Redis,
    /// Redis is configured but failing; memory is serving.
    MemoryFallback,
    /// No Redis configured.
    Memory,
}

impl CacheMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheMode::Redis => "redis",
            CacheMode::MemoryFallback => "memory_fallback",
            CacheMode::Memory => "memory",
        }
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub mode: CacheMode,
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub invalidations: u64,
    /// Number of times the cache switched from Redis to memory.
    pub fallback_events: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    invalidations: AtomicU64,
    fallback_events: AtomicU64,
}

/// Invalidation that could not reach Redis and is replayed on recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Pending {
    Key(String),
    Prefix(String),
}

/// Tenant-scoped JSON cache.
///
/// Holds an optional Redis primary and an always-present memory fallback.
/// Any primary error marks the cache degraded; [`TenantCache::probe`] clears
/// the flag once Redis answers again, replays invalidations issued in the
/// meantime and drops the memory contents, which may be stale by then.
pub struct TenantCache {
    primary: Option<Arc<dyn CacheBackend>>,
    memory: MemoryCache,
    keys: KeyBuilder,
    default_ttl: Duration,
    degraded: AtomicBool,
    pending: Mutex<Vec<Pending>>,
    counters: Counters,
}

impl TenantCache {
    /// Memory-only cache.
    pub fn memory(keys: KeyBuilder, capacity: usize, default_ttl: Duration) -> Self {
        Self {
            primary: None,
            memory: MemoryCache::new(capacity),
            keys,
            default_ttl,
            degraded: AtomicBool::new(false),
            pending: Mutex::new(Vec::new()),
            counters: Counters::default(),
        }
    }

    /// Cache with a primary backend and a memory fallback.
    pub fn with_primary(
        primary: Arc<dyn CacheBackend>,
        keys: KeyBuilder,
        capacity: usize,
        default_ttl: Duration,
    ) -> Self {
        Self {
            primary: Some(primary),
            ..Self::memory(keys, capacity, default_ttl)
        }
    }

    pub fn keys(&self) -> &KeyBuilder {
        &self.keys
    }

    pub fn mode(&self) -> CacheMode {
        match (&self.primary, self.is_degraded()) {
            (None, _) => CacheMode::Memory,
            (Some(_), true) => CacheMode::MemoryFallback,
            (Some(_), false) => CacheMode::Redis,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            mode: self.mode(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            sets: self.counters.sets.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
            fallback_events: self.counters.fallback_events.load(Ordering::Relaxed),
        }
    }

    /// Reads and decodes a cached value. Undecodable entries count as misses
    /// and are removed.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let decoded = match self.get_raw(key).await {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(key, error = %e, "Dropping undecodable cache entry");
                    self.delete_quietly(key).await;
                    None
                }
            },
            None => None,
        };

        match decoded {
            Some(value) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Encodes and stores a value. `ttl` defaults to the configured TTL.
    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let raw = serde_json::to_string(value)?;
        let ttl = ttl.unwrap_or(self.default_ttl);

        if let Some(primary) = self.active_primary() {
            match primary.set(key, &raw, ttl).await {
                Ok(()) => {
                    self.counters.sets.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                Err(e) => self.mark_degraded(&e),
            }
        }
        self.memory.set_value(key, raw, ttl);
        self.counters.sets.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Returns the cached value or loads, stores and returns it.
    ///
    /// Loader errors propagate; cache errors never do.
    pub async fn get_or_insert_with<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        loader: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get_json(key).await {
            return Ok(value);
        }

        let value = loader().await?;
        if let Err(e) = self.set_json(key, &value, ttl).await {
            warn!(key, error = %e, "Failed to cache loaded value");
        }
        Ok(value)
    }

    pub async fn delete(&self, key: &str) {
        self.delete_quietly(key).await;
        self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    async fn delete_quietly(&self, key: &str) {
        self.memory.remove(key);
        self.apply_or_defer(Pending::Key(key.to_string())).await;
    }

    /// Drops every cached entry of a tenant.
    pub async fn invalidate_tenant(&self, tenant: &TenantId) -> u64 {
        let prefix = self.keys.tenant_prefix(tenant);
        self.invalidate_prefix(prefix).await
    }

    /// Drops every cached entry of one resource of a tenant.
    pub async fn invalidate_resource(&self, tenant: &TenantId, resource: &str) -> u64 {
        let prefix = self.keys.resource_prefix(tenant, resource);
        self.invalidate_prefix(prefix).await
    }

    /// Invalidation applied after a record changes status.
    pub async fn invalidate_after_transition(&self, tenant: &TenantId) {
        self.invalidate_resource(tenant, RECORDS).await;
        self.invalidate_resource(tenant, DASHBOARD).await;
    }

    /// Pings the primary and updates the degraded flag.
    ///
    /// On recovery the pending invalidations are replayed against Redis and
    /// the memory fallback is cleared. Invalidations deferred while the replay
    /// runs are drained too; the flag is only cleared under the pending lock
    /// once nothing is left.
    pub async fn probe(&self) -> CacheMode {
        let Some(primary) = &self.primary else {
            return CacheMode::Memory;
        };

        match primary.ping().await {
            Ok(()) if self.is_degraded() => {
                let mut replayed = 0;
                loop {
                    let batch = {
                        let mut pending = self.lock_pending();
                        if pending.is_empty() {
                            self.memory.clear();
                            self.degraded.store(false, Ordering::SeqCst);
                            break;
                        }
                        std::mem::take(&mut *pending)
                    };

                    for (i, item) in batch.iter().enumerate() {
                        if let Err(e) = replay(primary.as_ref(), item).await {
                            warn!(error = %e, "Redis failed while replaying invalidations");
                            self.requeue(&batch[i..]);
                            return CacheMode::MemoryFallback;
                        }
                    }
                    replayed += batch.len();
                }
                info!(replayed, "Redis cache recovered");
                CacheMode::Redis
            }
            Ok(()) => CacheMode::Redis,
            Err(e) => {
                self.mark_degraded(&e);
                CacheMode::MemoryFallback
            }
        }
    }

    async fn get_raw(&self, key: &str) -> Option<String> {
        if let Some(primary) = self.active_primary() {
            match primary.get(key).await {
                Ok(value) => return value,
                Err(e) => self.mark_degraded(&e),
            }
        }
        self.memory.get_value(key)
    }

    async fn invalidate_prefix(&self, prefix: String) -> u64 {
        let mut removed = self.memory.remove_prefix(&prefix);
        removed += self.apply_or_defer(Pending::Prefix(prefix.clone())).await;

        self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        debug!(prefix = %prefix, removed, "Invalidated cache prefix");
        removed
    }

    fn active_primary(&self) -> Option<&Arc<dyn CacheBackend>> {
        self.primary.as_ref().filter(|_| !self.is_degraded())
    }

    fn mark_degraded(&self, error: &CacheError) {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            self.counters.fallback_events.fetch_add(1, Ordering::Relaxed);
            warn!(error = %error, "Redis cache unavailable, serving from memory fallback");
        }
    }

    /// Applies an invalidation to the primary, or queues it for replay while
    /// the cache is degraded. Returns the number of primary keys removed.
    async fn apply_or_defer(&self, item: Pending) -> u64 {
        let Some(primary) = &self.primary else {
            return 0;
        };
        loop {
            if !self.is_degraded() {
                match replay(primary.as_ref(), &item).await {
                    Ok(n) => return n,
                    Err(e) => self.mark_degraded(&e),
                }
            }
            if self.defer(&item) {
                return 0;
            }
            // recovered between the check and the deferral; apply directly
        }
    }

    /// Queues an invalidation unless the cache has recovered meanwhile.
    ///
    /// Shares the lock under which `probe` clears the degraded flag, so an
    /// item is either drained by that probe or refused here.
    fn defer(&self, item: &Pending) -> bool {
        let mut pending = self.lock_pending();
        if !self.is_degraded() {
            return false;
        }
        if !pending.contains(item) {
            pending.push(item.clone());
        }
        true
    }

    /// Puts back items a failed replay did not reach.
    fn requeue(&self, items: &[Pending]) {
        let mut pending = self.lock_pending();
        for item in items {
            if !pending.contains(item) {
                pending.push(item.clone());
            }
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, Vec<Pending>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn replay(primary: &dyn CacheBackend, item: &Pending) -> Result<u64, CacheError> {
    match item {
        Pending::Key(key) => primary.delete(key).await.map(|()| 1),
        Pending::Prefix(prefix) => primary.delete_prefix(prefix).await,
    }
}
