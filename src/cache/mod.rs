//! Ephemeral, TTL-bounded key-value storage for in-flight attempt state.
//!
//! The durable store stays authoritative; everything here may vanish at any time
//! and callers must treat failures as a degraded mode rather than a hard error.

pub mod memory_store;
pub mod redis_store;
pub mod session_cache;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub use memory_store::MemoryStore;
pub use redis_store::RedisStore;
pub use session_cache::SessionCache;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("value under {key} is not an integer")]
    NotAnInteger { key: String },

    #[error("corrupt cached value: {0}")]
    Corrupt(#[from] serde_json::Error),
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;

    /// Stores the value only when the key is absent. Returns whether it was stored.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool>;

    async fn del(&self, key: &str) -> CacheResult<()>;

    /// Deletes the key only while it still holds `expected`.
    async fn del_if_eq(&self, key: &str, expected: &str) -> CacheResult<bool>;

    /// Stores `value` when it is greater than the integer currently held (absent counts as zero)
    /// and refreshes the expiry either way. Returns the resulting value.
    async fn max_i64(&self, key: &str, value: i64, ttl: Duration) -> CacheResult<i64>;

    /// Resets the expiry of an existing key. Returns false when the key is gone.
    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool>;

    async fn keys_with_prefix(&self, prefix: &str) -> CacheResult<Vec<String>>;

    async fn ping(&self) -> CacheResult<()>;
}

pub type SharedCacheStore = Arc<dyn CacheStore>;

/// Opens the store named by `url`: `memory://` for the in-process store, anything else is handed to redis.
pub async fn connect(url: &str) -> CacheResult<SharedCacheStore> {
    if url.starts_with("memory://") {
        tracing::warn!("using in-process cache store; state is lost on restart");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = RedisStore::connect(url).await?;
    Ok(Arc::new(store))
}

pub mod keys {
    use uuid::Uuid;

    pub const DIRTY_PREFIX: &str = "attempt:dirty:";

    pub fn session(attempt_id: Uuid) -> String {
        format!("attempt_session:{}", attempt_id)
    }

    pub fn presence(attempt_id: Uuid) -> String {
        format!("ws_active:{}", attempt_id)
    }

    pub fn answers(attempt_id: Uuid) -> String {
        format!("attempt:answers:{}", attempt_id)
    }

    pub fn tabs(attempt_id: Uuid) -> String {
        format!("attempt:tabs:{}", attempt_id)
    }

    pub fn dirty(attempt_id: Uuid) -> String {
        format!("{}{}", DIRTY_PREFIX, attempt_id)
    }

    pub fn attempt_from_dirty(key: &str) -> Option<Uuid> {
        key.strip_prefix(DIRTY_PREFIX)
            .and_then(|raw| Uuid::parse_str(raw).ok())
    }
}
