//! In-process cache with TTL expiry and LRU eviction.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{CacheBackend, CacheError};

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
    last_accessed: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Bounded in-memory cache.
///
/// Serves as the fallback when Redis is unreachable and as the only backend
/// when no Redis URL is configured.
#[derive(Debug)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    capacity: usize,
}

impl MemoryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn get_value(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let mut entries = self.write();
        match entries.get_mut(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                None
            }
            Some(entry) => {
                entry.last_accessed = now;
                Some(entry.value.clone())
            }
            None => None,
        }
    }

    pub fn set_value(&self, key: &str, value: String, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.write();

        if !entries.contains_key(key) && entries.len() >= self.capacity {
            entries.retain(|_, entry| !entry.is_expired(now));
            if entries.len() >= self.capacity {
                evict_least_recent(&mut entries);
            }
        }

        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: now + ttl,
                last_accessed: now,
            },
        );
    }

    pub fn remove(&self, key: &str) -> bool {
        self.write().remove(key).is_some()
    }

    pub fn remove_prefix(&self, prefix: &str) -> u64 {
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        (before - entries.len()) as u64
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn evict_least_recent(entries: &mut HashMap<String, CacheEntry>) {
    let oldest = entries
        .iter()
        .min_by_key(|(_, entry)| entry.last_accessed)
        .map(|(key, _)| key.clone());

    if let Some(key) = oldest {
        entries.remove(&key);
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.get_value(key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.set_value(key, value.to_string(), ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        Ok(self.remove_prefix(prefix))
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn test_get_set() {
        let cache = MemoryCache::new(10);
        assert_eq!(cache.get_value("a"), None);
        cache.set_value("a", "1".into(), MINUTE);
        assert_eq!(cache.get_value("a").as_deref(), Some("1"));
        assert!(cache.remove("a"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_expired_entries_are_dropped() {
        let cache = MemoryCache::new(10);
        cache.set_value("a", "1".into(), Duration::ZERO);
        assert_eq!(cache.get_value("a"), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_lru_eviction_at_capacity() {
        let cache = MemoryCache::new(2);
        cache.set_value("a", "1".into(), MINUTE);
        std::thread::sleep(Duration::from_millis(2));
        cache.set_value("b", "2".into(), MINUTE);
        std::thread::sleep(Duration::from_millis(2));

        // touch "a" so "b" becomes least recently used
        cache.get_value("a");
        std::thread::sleep(Duration::from_millis(2));
        cache.set_value("c", "3".into(), MINUTE);

        assert_eq!(cache.len(), 2);
        assert!(cache.get_value("a").is_some());
        assert!(cache.get_value("b").is_none());
        assert!(cache.get_value("c").is_some());
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let cache = MemoryCache::new(1);
        cache.set_value("a", "1".into(), MINUTE);
        cache.set_value("a", "2".into(), MINUTE);
        assert_eq!(cache.get_value("a").as_deref(), Some("2"));
    }

    #[test]
    fn test_remove_prefix() {
        let cache = MemoryCache::new(10);
        cache.set_value("qgov:acme:records:1", "x".into(), MINUTE);
        cache.set_value("qgov:acme:dashboard:ab", "y".into(), MINUTE);
        cache.set_value("qgov:globex:records:1", "z".into(), MINUTE);

        assert_eq!(cache.remove_prefix("qgov:acme:"), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.get_value("qgov:globex:records:1").is_some());
    }
}
