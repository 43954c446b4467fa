//! Tenant-scoped caching with a Redis primary and an in-memory fallback.
//!
//! - **KeyBuilder**: `{namespace}:{tenant}:{resource}:{discriminator}` keys
//! - **CacheBackend**: storage seam implemented by [`RedisCache`] and [`MemoryCache`]
//! - **TenantCache**: typed JSON access, degraded-mode fallback and invalidation
//!
//! Cache failures never fail a request: when Redis errors the cache flips to
//! degraded mode and serves from memory until a probe succeeds.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod key;
pub mod memory;
pub mod redis;
pub mod tenant;

pub use key::{params_digest, KeyBuilder};
pub use memory::MemoryCache;
pub use self::redis::RedisCache;
pub use tenant::{CacheMode, CacheStats, TenantCache};

/// Errors raised by cache backends.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Redis operation failed: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Raw string storage used by [`TenantCache`].
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Deletes every key starting with `prefix` and returns how many went.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}
