//! Redis pool.
//!
//! redis-rs multiplexes commands over one `ConnectionManager`, which also
//! reconnects on its own. Pool limits are enforced on checkout: at most
//! `max_connections` callers hold a connection at once, and no checkout
//! succeeds once the pool is closed.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::Client;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use common::{AppError, AppResult, PoolConfig, PoolError, PoolKind};

use super::pool::ResourcePool;

/// Redis connection pool.
pub struct CachePool {
    connection: ConnectionManager,
    permits: Arc<Semaphore>,
}

impl CachePool {
    /// Connect to Redis with the dial and response timeouts from `config`.
    pub async fn open(config: &PoolConfig) -> Result<Self, PoolError> {
        let name = PoolKind::Cache.name();
        let client = Client::open(config.url()).map_err(|e| PoolError::open(name, e))?;

        let manager_config = ConnectionManagerConfig::new()
            .set_connection_timeout(config.dial_timeout())
            .set_response_timeout(response_timeout(config));

        let connection = ConnectionManager::new_with_config(client, manager_config)
            .await
            .map_err(|e| PoolError::cache_unavailable(name, e))?;

        Ok(Self {
            connection,
            permits: Arc::new(Semaphore::new(config.max_connections() as usize)),
        })
    }

    /// Check a connection out of the pool.
    ///
    /// Waits while `max_connections` connections are in use; fails once the
    /// pool has been closed.
    pub async fn checkout(&self) -> AppResult<CacheConnection> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AppError::service_unavailable(PoolKind::Cache.name()))?;

        Ok(CacheConnection {
            connection: self.connection.clone(),
            _permit: permit,
        })
    }
}

/// Commands can take as long as the slower of the read and write budgets.
fn response_timeout(config: &PoolConfig) -> Duration {
    config.read_timeout().max(config.write_timeout())
}

#[async_trait]
impl ResourcePool for CachePool {
    fn name(&self) -> &str {
        PoolKind::Cache.name()
    }

    async fn ping(&self) -> Result<(), PoolError> {
        let mut conn = self.connection.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| PoolError::probe(self.name(), e))?;

        if pong != "PONG" {
            return Err(PoolError::probe(
                self.name(),
                format!("unexpected PING reply '{}'", pong),
            ));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), PoolError> {
        // Outstanding checkouts finish; new ones fail. The multiplexed
        // connection itself goes away with the last handle.
        self.permits.close();
        Ok(())
    }
}

/// A checked-out Redis connection. Returns its slot to the pool on drop.
pub struct CacheConnection {
    connection: ConnectionManager,
    _permit: OwnedSemaphorePermit,
}

impl Deref for CacheConnection {
    type Target = ConnectionManager;

    fn deref(&self) -> &Self::Target {
        &self.connection
    }
}

impl DerefMut for CacheConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.connection
    }
}
