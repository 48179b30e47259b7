pub mod cache;
pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use std::sync::Arc;

use crate::cache::{SessionCache, SharedCacheStore};
use crate::config::ProctoringPolicy;
use crate::database::attempt_store::AttemptStore;
use crate::services::{
    attempt_service::AttemptService, autosave_service::AutosaveService,
    presence_service::PresenceService,
};
use sqlx::PgPool;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub cache: SessionCache,
    pub policy: Arc<ProctoringPolicy>,
    pub attempt_service: AttemptService,
    pub presence_service: PresenceService,
    pub autosave_service: AutosaveService,
}

impl AppState {
    pub fn new(pool: PgPool, cache_store: SharedCacheStore, policy: ProctoringPolicy) -> Self {
        let policy = Arc::new(policy);
        let cache = SessionCache::new(cache_store, &policy);
        let store = AttemptStore::new(pool.clone());

        let attempt_service = AttemptService::new(store.clone(), cache.clone(), Arc::clone(&policy));
        let presence_service = PresenceService::new(
            store.clone(),
            cache.clone(),
            attempt_service.clone(),
            Arc::clone(&policy),
        );
        let autosave_service = AutosaveService::new(store, cache.clone());

        Self {
            pool,
            cache,
            policy,
            attempt_service,
            presence_service,
            autosave_service,
        }
    }
}
