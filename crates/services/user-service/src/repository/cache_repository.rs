//! User cache over the Redis pool.

use std::sync::Arc;

use async_trait::async_trait;
use redis::AsyncCommands;
use uuid::Uuid;

use common::{AppError, AppResult};
use domain::User;

use crate::infra::CachePool;

#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;

/// Key prefix for cached users
pub const CACHE_PREFIX_USER: &str = "user:";

/// Default cache TTL (1 hour)
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 3600;

/// Cache of user records keyed by id.
#[cfg_attr(any(test, feature = "test-utils"), automock)]
#[async_trait]
pub trait CacheRepository: Send + Sync {
    async fn get_user(&self, id: Uuid) -> AppResult<Option<User>>;

    async fn set_user(&self, user: &User) -> AppResult<()>;

    async fn invalidate_user(&self, id: Uuid) -> AppResult<()>;
}

/// Redis implementation of [`CacheRepository`]; values are JSON.
pub struct RedisUserCache {
    pool: Arc<CachePool>,
    ttl_seconds: u64,
}

impl RedisUserCache {
    pub fn new(pool: Arc<CachePool>, ttl_seconds: u64) -> Self {
        Self { pool, ttl_seconds }
    }
}

fn user_key(id: Uuid) -> String {
    format!("{}{}", CACHE_PREFIX_USER, id)
}

#[async_trait]
impl CacheRepository for RedisUserCache {
    async fn get_user(&self, id: Uuid) -> AppResult<Option<User>> {
        let mut conn = self.pool.checkout().await?;
        let value: Option<String> = conn.get(user_key(id)).await?;

        value
            .map(|json| {
                serde_json::from_str(&json)
                    .map_err(|e| AppError::internal(format!("Cache deserialization error: {}", e)))
            })
            .transpose()
    }

    async fn set_user(&self, user: &User) -> AppResult<()> {
        let json = serde_json::to_string(user)
            .map_err(|e| AppError::internal(format!("Cache serialization error: {}", e)))?;

        let mut conn = self.pool.checkout().await?;
        conn.set_ex::<_, _, ()>(user_key(user.id), json, self.ttl_seconds)
            .await?;
        Ok(())
    }

    async fn invalidate_user(&self, id: Uuid) -> AppResult<()> {
        let mut conn = self.pool.checkout().await?;
        let _: () = conn.del(user_key(id)).await?;
        Ok(())
    }
}
