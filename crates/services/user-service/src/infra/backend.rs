//! Production backend: PostgreSQL and Redis.

use std::sync::Arc;

use async_trait::async_trait;

use common::{PoolConfig, PoolError};

use super::cache::CachePool;
use super::db::RelationalPool;
use super::pool::Backend;
use crate::repository::{
    CacheRepository, RedisUserCache, UserRepository, UserStore, DEFAULT_CACHE_TTL_SECONDS,
};

/// Opens real pools and builds the sea-orm / redis repositories.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiveBackend;

#[async_trait]
impl Backend for LiveBackend {
    type Relational = RelationalPool;
    type Cache = CachePool;

    async fn connect_relational(&self, config: &PoolConfig) -> Result<RelationalPool, PoolError> {
        RelationalPool::open(config).await
    }

    async fn connect_cache(&self, config: &PoolConfig) -> Result<CachePool, PoolError> {
        CachePool::open(config).await
    }

    fn user_repository(&self, pool: &Arc<RelationalPool>) -> Arc<dyn UserRepository> {
        Arc::new(UserStore::new(pool.connection()))
    }

    fn cache_repository(&self, pool: &Arc<CachePool>) -> Arc<dyn CacheRepository> {
        Arc::new(RedisUserCache::new(pool.clone(), DEFAULT_CACHE_TTL_SECONDS))
    }
}
