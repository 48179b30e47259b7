use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

use super::{CacheError, CacheResult, CacheStore};

#[derive(Debug, Clone)]
struct Slot {
    value: String,
    expires_at: Instant,
}

impl Slot {
    fn new(value: &str, ttl: Duration) -> Self {
        Self {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_live(&self) -> bool {
        self.expires_at > Instant::now()
    }
}

/// In-process store with lazy expiry, for tests and single-box development.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Slot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let live = self
            .entries
            .get(key)
            .map(|slot| slot.is_live().then(|| slot.value.clone()));
        match live {
            Some(Some(value)) => Ok(Some(value)),
            Some(None) => {
                self.entries.remove_if(key, |_, slot| !slot.is_live());
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        self.entries.insert(key.to_string(), Slot::new(value, ttl));
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live() {
                    return Ok(false);
                }
                occupied.insert(Slot::new(value, ttl));
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::new(value, ttl));
                Ok(true)
            }
        }
    }

    async fn del(&self, key: &str) -> CacheResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn del_if_eq(&self, key: &str, expected: &str) -> CacheResult<bool> {
        let removed = self
            .entries
            .remove_if(key, |_, slot| slot.is_live() && slot.value == expected);
        Ok(removed.is_some())
    }

    async fn max_i64(&self, key: &str, value: i64, ttl: Duration) -> CacheResult<i64> {
        let mut slot = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Slot::new("0", ttl));
        if !slot.is_live() {
            *slot = Slot::new("0", ttl);
        }
        let current: i64 = slot.value.parse().map_err(|_| CacheError::NotAnInteger {
            key: key.to_string(),
        })?;
        let resulting = current.max(value);
        *slot = Slot::new(&resulting.to_string(), ttl);
        Ok(resulting)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        match self.entries.get_mut(key) {
            Some(mut slot) if slot.is_live() => {
                slot.expires_at = Instant::now() + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn keys_with_prefix(&self, prefix: &str) -> CacheResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix) && entry.value().is_live())
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn ping(&self) -> CacheResult<()> {
        Ok(())
    }
}
