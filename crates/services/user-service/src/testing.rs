//! In-memory backend and helpers for lifecycle tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use common::{JwtConfig, JwtSettings, PoolConfig, PoolError, PoolKind, PoolSettings};

use crate::config::UserServiceConfig;
use crate::infra::{Backend, ResourcePool};
use crate::repository::{
    CacheRepository, MockCacheRepository, MockUserRepository, UserRepository,
};

/// Ordered record of lifecycle events, shared between fakes.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolBehavior {
    Healthy,
    RefuseConnect,
    HangConnect,
    FailPing,
    HangPing,
    FailClose,
}

#[derive(Debug, Default)]
struct Counters {
    connects: AtomicUsize,
    closes: AtomicUsize,
}

/// Pool double. Clones share their counters.
#[derive(Debug, Clone)]
pub struct FakePool {
    name: &'static str,
    behavior: PoolBehavior,
    counters: Arc<Counters>,
    events: EventLog,
}

impl FakePool {
    fn new(kind: PoolKind, events: EventLog) -> Self {
        Self {
            name: kind.name(),
            behavior: PoolBehavior::Healthy,
            counters: Arc::default(),
            events,
        }
    }

    pub fn connect_calls(&self) -> usize {
        self.counters.connects.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.counters.closes.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<FakePool, PoolError> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            PoolBehavior::RefuseConnect => Err(PoolError::open(self.name, "connection refused")),
            PoolBehavior::HangConnect => std::future::pending().await,
            _ => Ok(self.clone()),
        }
    }
}

#[async_trait]
impl ResourcePool for FakePool {
    fn name(&self) -> &str {
        self.name
    }

    async fn ping(&self) -> Result<(), PoolError> {
        match self.behavior {
            PoolBehavior::FailPing => Err(PoolError::probe(self.name, "server closed the connection")),
            PoolBehavior::HangPing => std::future::pending().await,
            _ => Ok(()),
        }
    }

    async fn close(&self) -> Result<(), PoolError> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        self.events.push(format!("close:{}", self.name));
        match self.behavior {
            PoolBehavior::FailClose => Err(PoolError::close(self.name, "connection reset")),
            _ => Ok(()),
        }
    }
}

/// Backend whose pools behave as configured. Repositories are bare mocks.
#[derive(Debug, Clone)]
pub struct FakeBackend {
    relational: FakePool,
    cache: FakePool,
    events: EventLog,
}

impl FakeBackend {
    pub fn healthy() -> Self {
        let events = EventLog::default();
        Self {
            relational: FakePool::new(PoolKind::Relational, events.clone()),
            cache: FakePool::new(PoolKind::Cache, events.clone()),
            events,
        }
    }

    pub fn with_relational(mut self, behavior: PoolBehavior) -> Self {
        self.relational.behavior = behavior;
        self
    }

    pub fn with_cache(mut self, behavior: PoolBehavior) -> Self {
        self.cache.behavior = behavior;
        self
    }

    pub fn relational_pool(&self) -> &FakePool {
        &self.relational
    }

    pub fn cache_pool(&self) -> &FakePool {
        &self.cache
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }
}

#[async_trait]
impl Backend for FakeBackend {
    type Relational = FakePool;
    type Cache = FakePool;

    async fn connect_relational(&self, _config: &PoolConfig) -> Result<FakePool, PoolError> {
        self.relational.connect().await
    }

    async fn connect_cache(&self, _config: &PoolConfig) -> Result<FakePool, PoolError> {
        self.cache.connect().await
    }

    fn user_repository(&self, _pool: &Arc<FakePool>) -> Arc<dyn UserRepository> {
        Arc::new(MockUserRepository::new())
    }

    fn cache_repository(&self, _pool: &Arc<FakePool>) -> Arc<dyn CacheRepository> {
        Arc::new(MockCacheRepository::new())
    }
}

pub fn jwt_config() -> JwtConfig {
    JwtSettings {
        secret: "test-secret-key-that-is-32-bytes!".to_string(),
        expiration_hours: 1,
    }
    .validate()
    .unwrap()
}

/// Loopback listener, short timeouts.
pub fn test_config(listen_addr: &str) -> UserServiceConfig {
    UserServiceConfig {
        database: PoolSettings::relational_defaults()
            .validate(PoolKind::Relational)
            .unwrap(),
        cache: PoolSettings {
            dial_timeout_ms: 100,
            ..PoolSettings::cache_defaults()
        }
        .validate(PoolKind::Cache)
        .unwrap(),
        jwt: jwt_config(),
        listen_addr: listen_addr.to_string(),
        shutdown_timeout: Duration::from_secs(1),
    }
}
