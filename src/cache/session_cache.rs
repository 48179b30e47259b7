use std::time::Duration;
use uuid::Uuid;

use super::{keys, CacheError, CacheResult, SharedCacheStore};
use crate::config::ProctoringPolicy;
use crate::models::exam_attempt::StampedAnswers;

/// Typed view over the cache key namespace used by a live attempt.
#[derive(Clone)]
pub struct SessionCache {
    store: SharedCacheStore,
    session_ttl: Duration,
    autosave_ttl: Duration,
    presence_ttl: Duration,
}

impl SessionCache {
    pub fn new(store: SharedCacheStore, policy: &ProctoringPolicy) -> Self {
        Self {
            store,
            session_ttl: policy.session_ttl,
            autosave_ttl: policy.autosave_ttl,
            presence_ttl: policy.presence_ttl(),
        }
    }

    pub async fn register_token(&self, attempt_id: Uuid, token: &str) -> CacheResult<()> {
        self.store
            .set(&keys::session(attempt_id), token, self.session_ttl)
            .await
    }

    pub async fn session_token(&self, attempt_id: Uuid) -> CacheResult<Option<String>> {
        self.store.get(&keys::session(attempt_id)).await
    }

    pub async fn store_answers(&self, attempt_id: Uuid, stamped: &StampedAnswers) -> CacheResult<()> {
        let encoded = serde_json::to_string(stamped)?;
        self.store
            .set(&keys::answers(attempt_id), &encoded, self.autosave_ttl)
            .await
    }

    pub async fn answers(&self, attempt_id: Uuid) -> CacheResult<Option<StampedAnswers>> {
        match self.store.get(&keys::answers(attempt_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn discard_answers(&self, attempt_id: Uuid) -> CacheResult<()> {
        self.store.del(&keys::answers(attempt_id)).await
    }

    /// Raises the cached counter to at least `count` and returns the resulting value.
    pub async fn raise_tab_switches(&self, attempt_id: Uuid, count: i32) -> CacheResult<i32> {
        let stored = self
            .store
            .max_i64(&keys::tabs(attempt_id), i64::from(count), self.autosave_ttl)
            .await?;
        Ok(clamp_count(stored))
    }

    pub async fn tab_switches(&self, attempt_id: Uuid) -> CacheResult<Option<i32>> {
        let key = keys::tabs(attempt_id);
        match self.store.get(&key).await? {
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .map(|value| Some(clamp_count(value)))
                .map_err(|_| CacheError::NotAnInteger { key }),
            None => Ok(None),
        }
    }

    pub async fn mark_dirty(&self, attempt_id: Uuid) -> CacheResult<()> {
        self.store
            .set(&keys::dirty(attempt_id), "1", self.autosave_ttl)
            .await
    }

    pub async fn clear_dirty(&self, attempt_id: Uuid) -> CacheResult<()> {
        self.store.del(&keys::dirty(attempt_id)).await
    }

    pub async fn dirty_attempts(&self) -> CacheResult<Vec<Uuid>> {
        let found = self.store.keys_with_prefix(keys::DIRTY_PREFIX).await?;
        Ok(found
            .iter()
            .filter_map(|key| keys::attempt_from_dirty(key))
            .collect())
    }

    /// Claims the single live-connection slot for an attempt.
    pub async fn acquire_presence(&self, attempt_id: Uuid, connection_id: &str) -> CacheResult<bool> {
        self.store
            .set_nx(&keys::presence(attempt_id), connection_id, self.presence_ttl)
            .await
    }

    pub async fn refresh_presence(&self, attempt_id: Uuid) -> CacheResult<bool> {
        self.store
            .expire(&keys::presence(attempt_id), self.presence_ttl)
            .await
    }

    /// Frees the slot only if `connection_id` still owns it.
    pub async fn release_presence(&self, attempt_id: Uuid, connection_id: &str) -> CacheResult<bool> {
        self.store
            .del_if_eq(&keys::presence(attempt_id), connection_id)
            .await
    }

    pub async fn presence_held(&self, attempt_id: Uuid) -> CacheResult<bool> {
        Ok(self.store.get(&keys::presence(attempt_id)).await?.is_some())
    }

    /// Drops the autosave and session keys of a finalized attempt.
    pub async fn forget_attempt(&self, attempt_id: Uuid) -> CacheResult<()> {
        self.store.del(&keys::answers(attempt_id)).await?;
        self.store.del(&keys::tabs(attempt_id)).await?;
        self.store.del(&keys::dirty(attempt_id)).await?;
        self.store.del(&keys::session(attempt_id)).await
    }

    pub async fn ping(&self) -> CacheResult<()> {
        self.store.ping().await
    }
}

fn clamp_count(value: i64) -> i32 {
    value.clamp(0, i64::from(i32::MAX)) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheResult, CacheStore, MemoryStore};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    /// Store whose every call fails like an unreachable Redis.
    struct DownStore;

    fn refused<T>() -> CacheResult<T> {
        Err(CacheError::Redis(redis::RedisError::from((
            redis::ErrorKind::IoError,
            "connection refused",
        ))))
    }

    #[async_trait]
    impl CacheStore for DownStore {
        async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
            refused()
        }
        async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> CacheResult<()> {
            refused()
        }
        async fn set_nx(&self, _key: &str, _value: &str, _ttl: Duration) -> CacheResult<bool> {
            refused()
        }
        async fn del(&self, _key: &str) -> CacheResult<()> {
            refused()
        }
        async fn del_if_eq(&self, _key: &str, _expected: &str) -> CacheResult<bool> {
            refused()
        }
        async fn max_i64(&self, _key: &str, _value: i64, _ttl: Duration) -> CacheResult<i64> {
            refused()
        }
        async fn expire(&self, _key: &str, _ttl: Duration) -> CacheResult<bool> {
            refused()
        }
        async fn keys_with_prefix(&self, _prefix: &str) -> CacheResult<Vec<String>> {
            refused()
        }
        async fn ping(&self) -> CacheResult<()> {
            refused()
        }
    }

    fn memory_cache() -> SessionCache {
        SessionCache::new(Arc::new(MemoryStore::new()), &ProctoringPolicy::default())
    }

    #[tokio::test]
    async fn answers_round_trip_through_json() {
        let cache = memory_cache();
        let attempt_id = Uuid::new_v4();
        let mut answers = BTreeMap::new();
        answers.insert("q1".to_string(), "A".to_string());
        answers.insert("q2".to_string(), "B, C".to_string());

        let stamped = StampedAnswers {
            saved_at: chrono::Utc::now(),
            answers,
        };
        cache.store_answers(attempt_id, &stamped).await.unwrap();
        assert_eq!(cache.answers(attempt_id).await.unwrap(), Some(stamped));
        assert_eq!(cache.answers(Uuid::new_v4()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn dirty_markers_list_attempt_ids() {
        let cache = memory_cache();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        cache.mark_dirty(first).await.unwrap();
        cache.mark_dirty(second).await.unwrap();
        cache.clear_dirty(first).await.unwrap();

        assert_eq!(cache.dirty_attempts().await.unwrap(), vec![second]);
    }

    #[tokio::test]
    async fn presence_is_single_writer() {
        let cache = memory_cache();
        let attempt_id = Uuid::new_v4();
        assert!(cache.acquire_presence(attempt_id, "conn-a").await.unwrap());
        assert!(!cache.acquire_presence(attempt_id, "conn-b").await.unwrap());
        assert!(!cache.release_presence(attempt_id, "conn-b").await.unwrap());
        assert!(cache.presence_held(attempt_id).await.unwrap());
        assert!(cache.release_presence(attempt_id, "conn-a").await.unwrap());
        assert!(!cache.presence_held(attempt_id).await.unwrap());
    }

    #[tokio::test]
    async fn forget_attempt_clears_autosave_state() {
        let cache = memory_cache();
        let attempt_id = Uuid::new_v4();
        cache.register_token(attempt_id, "tok").await.unwrap();
        cache.raise_tab_switches(attempt_id, 2).await.unwrap();
        cache.mark_dirty(attempt_id).await.unwrap();

        cache.forget_attempt(attempt_id).await.unwrap();
        assert_eq!(cache.session_token(attempt_id).await.unwrap(), None);
        assert_eq!(cache.tab_switches(attempt_id).await.unwrap(), None);
        assert!(cache.dirty_attempts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn garbage_tab_counter_is_reported() {
        let attempt_id = Uuid::new_v4();
        let store = Arc::new(MemoryStore::new());
        store
            .set(&keys::tabs(attempt_id), "three", Duration::from_secs(60))
            .await
            .unwrap();
        let cache = SessionCache::new(store, &ProctoringPolicy::default());

        let err = cache.tab_switches(attempt_id).await.unwrap_err();
        assert!(matches!(err, CacheError::NotAnInteger { .. }));
    }

    #[tokio::test]
    async fn store_failures_surface_as_cache_errors() {
        let attempt_id = Uuid::new_v4();
        let cache = SessionCache::new(Arc::new(DownStore), &ProctoringPolicy::default());

        assert!(matches!(cache.mark_dirty(attempt_id).await, Err(CacheError::Redis(_))));
        assert!(cache.acquire_presence(attempt_id, "conn").await.is_err());
        assert!(cache.ping().await.is_err());
    }
}
