//! Resource pool ownership.
//!
//! `PoolManager` is the only component that opens or closes pools. Everything
//! else receives `Arc` handles through which it can check connections out,
//! but `ResourcePool::close` is only ever called from here, once per pool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, error, info, warn};

use common::{AggregatedCloseError, PoolConfig, PoolError};

use crate::repository::{CacheRepository, UserRepository};

/// Upper bound for closing a single pool during teardown.
pub const POOL_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// A live pool of connections to one backing store.
#[async_trait]
pub trait ResourcePool: Send + Sync {
    /// Short name used in logs and error reports.
    fn name(&self) -> &str;

    /// Round-trip liveness check.
    async fn ping(&self) -> Result<(), PoolError>;

    /// Release every connection. Called at most once, by `PoolManager`.
    async fn close(&self) -> Result<(), PoolError>;
}

/// Opens concrete pools and builds the repositories that sit on them.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    type Relational: ResourcePool + 'static;
    type Cache: ResourcePool + 'static;

    /// Establish the relational pool eagerly with every configured limit.
    async fn connect_relational(&self, config: &PoolConfig) -> Result<Self::Relational, PoolError>;

    /// Establish the cache pool.
    async fn connect_cache(&self, config: &PoolConfig) -> Result<Self::Cache, PoolError>;

    fn user_repository(&self, pool: &Arc<Self::Relational>) -> Arc<dyn UserRepository>;

    fn cache_repository(&self, pool: &Arc<Self::Cache>) -> Arc<dyn CacheRepository>;
}

/// Owner of the service's pools.
pub struct PoolManager<B: Backend> {
    backend: B,
    /// Open pools in opening order
    opened: Vec<Arc<dyn ResourcePool>>,
}

impl<B: Backend> PoolManager<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            opened: Vec::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Names of the pools currently open, in opening order.
    pub fn open_pools(&self) -> Vec<String> {
        self.opened.iter().map(|p| p.name().to_string()).collect()
    }

    /// Open the relational pool and verify it answers. Connecting and the
    /// probe are each bounded by the dial timeout.
    pub async fn open_relational(
        &mut self,
        config: &PoolConfig,
    ) -> Result<Arc<B::Relational>, PoolError> {
        let name = config.kind().name();
        let dial = config.dial_timeout();

        info!(
            pool = name,
            target = %config.redacted_url(),
            max_connections = config.max_connections(),
            min_connections = config.min_connections(),
            dial_timeout = ?dial,
            health_check_interval = ?config.health_check_interval(),
            "Opening relational pool"
        );

        let pool = match timeout(dial, self.backend.connect_relational(config)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(PoolError::open(
                    name,
                    format!("connect did not finish within {:?}", dial),
                ))
            }
        };

        let probe = match timeout(dial, pool.ping()).await {
            Ok(result) => result,
            Err(_) => Err(PoolError::probe(pool.name(), format!("no answer within {:?}", dial))),
        };
        if let Err(e) = probe {
            discard(&pool).await;
            return Err(e);
        }

        info!(pool = pool.name(), "Relational pool ready");
        Ok(self.track(pool))
    }

    /// Open the cache pool. Connecting and the PING round trip must both
    /// finish before the dial timeout, otherwise `CacheUnavailable`.
    pub async fn open_cache(&mut self, config: &PoolConfig) -> Result<Arc<B::Cache>, PoolError> {
        let name = config.kind().name();
        let dial = config.dial_timeout();
        let deadline = Instant::now() + dial;

        info!(
            pool = name,
            target = %config.redacted_url(),
            max_connections = config.max_connections(),
            dial_timeout = ?dial,
            "Opening cache pool"
        );

        let pool = match timeout_at(deadline, self.backend.connect_cache(config)).await {
            Ok(Ok(pool)) => pool,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(PoolError::cache_unavailable(
                    name,
                    format!("connect did not finish within {:?}", dial),
                ))
            }
        };

        let probe = match timeout_at(deadline, pool.ping()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(PoolError::cache_unavailable(pool.name(), e)),
            Err(_) => Err(PoolError::cache_unavailable(
                pool.name(),
                format!("PING not answered within {:?}", dial),
            )),
        };
        if let Err(e) = probe {
            discard(&pool).await;
            return Err(e);
        }

        info!(pool = pool.name(), "Cache pool ready");
        Ok(self.track(pool))
    }

    fn track<P: ResourcePool + 'static>(&mut self, pool: P) -> Arc<P> {
        let pool = Arc::new(pool);
        self.opened.push(pool.clone());
        pool
    }

    /// Close every open pool, newest first, without stopping at failures.
    ///
    /// Closed pools are forgotten, so a second call closes nothing.
    pub async fn close_all(&mut self) -> Result<(), AggregatedCloseError> {
        if self.opened.is_empty() {
            debug!("No pools to close");
            return Ok(());
        }

        let mut failures = Vec::new();
        while let Some(pool) = self.opened.pop() {
            let result = match timeout(POOL_CLOSE_TIMEOUT, pool.close()).await {
                Ok(result) => result,
                Err(_) => Err(PoolError::close(
                    pool.name(),
                    format!("did not close within {:?}", POOL_CLOSE_TIMEOUT),
                )),
            };

            match result {
                Ok(()) => info!(pool = pool.name(), "Pool closed"),
                Err(e) => {
                    error!(pool = pool.name(), error = %e, "Pool failed to close");
                    failures.push(e);
                }
            }
        }

        match AggregatedCloseError::from_failures(failures) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Close a pool that never became part of the managed set.
async fn discard<P: ResourcePool>(pool: &P) {
    if let Err(e) = pool.close().await {
        warn!(pool = pool.name(), error = %e, "Failed to close pool after a failed probe");
    }
}
