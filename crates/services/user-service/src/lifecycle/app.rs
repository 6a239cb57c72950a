//! Application - startup and shutdown of the whole service.

use std::future::Future;
use std::net::SocketAddr;

use tracing::{error, info};

use common::StartupError;

use super::assembler::ServiceGraph;
use super::shutdown::{ShutdownOrchestrator, ShutdownReport};
use crate::config::UserServiceConfig;
use crate::infra::{Backend, PoolManager};
use crate::tcp::{ListenerState, ListenerSupervisor};

/// Owns the pools and the listener for one run of the service.
pub struct Application<B: Backend> {
    config: UserServiceConfig,
    pools: PoolManager<B>,
    listener: ListenerSupervisor,
}

impl<B: Backend> Application<B> {
    pub fn new(config: UserServiceConfig, backend: B) -> Self {
        Self {
            config,
            pools: PoolManager::new(backend),
            listener: ListenerSupervisor::new(),
        }
    }

    /// Open the pools, assemble the services and start listening.
    ///
    /// On failure every pool opened so far is closed again and the listener
    /// never accepts a connection.
    pub async fn start(&mut self) -> Result<SocketAddr, StartupError> {
        let relational = match self.pools.open_relational(&self.config.database).await {
            Ok(pool) => pool,
            Err(e) => return Err(self.abort_startup(e.into()).await),
        };
        let cache = match self.pools.open_cache(&self.config.cache).await {
            Ok(pool) => pool,
            Err(e) => return Err(self.abort_startup(e.into()).await),
        };

        let graph = ServiceGraph::assemble(
            self.pools.backend(),
            &relational,
            &cache,
            &self.config.jwt,
        );

        match self
            .listener
            .start(&self.config.listen_addr, graph.handler())
            .await
        {
            Ok(addr) => {
                info!(addr = %addr, "User service ready");
                Ok(addr)
            }
            Err(e) => Err(self.abort_startup(e).await),
        }
    }

    async fn abort_startup(&mut self, err: StartupError) -> StartupError {
        error!(error = %err, "Startup failed, releasing opened pools");
        if let Err(close) = self.pools.close_all().await {
            error!(error = %close, "Failed to release pools after startup failure");
        }
        err
    }

    /// Wait for `signal`, then drain the listener and close the pools.
    pub async fn shutdown<S>(&mut self, signal: S) -> ShutdownReport
    where
        S: Future<Output = ()>,
    {
        ShutdownOrchestrator::new(self.config.shutdown_timeout)
            .run(signal, &mut self.listener, &mut self.pools)
            .await
    }

    pub fn listener_state(&self) -> ListenerState {
        self.listener.state()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::shutdown::ListenerControl;
    use crate::testing::{test_config, EventLog, FakeBackend, PoolBehavior};
    use async_trait::async_trait;
    use common::{PoolError, ShutdownError};
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpStream;

    /// Records when the real listener has finished stopping.
    struct RecordingListener<'a> {
        inner: &'a mut ListenerSupervisor,
        events: EventLog,
    }

    #[async_trait]
    impl ListenerControl for RecordingListener<'_> {
        async fn stop_listener(&mut self, drain_timeout: Duration) -> Result<(), ShutdownError> {
            let result = self.inner.stop(drain_timeout).await;
            self.events.push("stopped:listener");
            result
        }
    }

    #[tokio::test]
    async fn test_happy_path_serves_then_exits_cleanly() {
        let backend = FakeBackend::healthy();
        let mut app = Application::new(test_config("127.0.0.1:0"), backend.clone());

        let addr = app.start().await.unwrap();
        assert_eq!(app.listener_state(), ListenerState::Running);
        assert_eq!(app.local_addr(), Some(addr));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"{\"op\":\"ping\"}\n").await.unwrap();
        let mut reply = String::new();
        BufReader::new(&mut client).read_line(&mut reply).await.unwrap();
        assert!(reply.contains("\"pong\":true"));

        let report = app.shutdown(async {}).await;

        assert!(report.is_success(), "{}", report.status_line());
        assert_eq!(report.exit_code(), 0);
        assert_eq!(app.listener_state(), ListenerState::Stopped);
        assert_eq!(backend.relational_pool().close_calls(), 1);
        assert_eq!(backend.cache_pool().close_calls(), 1);
    }

    #[tokio::test]
    async fn test_listener_stops_before_first_pool_close() {
        let backend = FakeBackend::healthy();
        let mut app = Application::new(test_config("127.0.0.1:0"), backend.clone());
        let addr = app.start().await.unwrap();
        let _client = TcpStream::connect(addr).await.unwrap();

        let mut listener = RecordingListener {
            inner: &mut app.listener,
            events: backend.events().clone(),
        };
        let report = ShutdownOrchestrator::new(Duration::from_secs(1))
            .teardown(&mut listener, &mut app.pools)
            .await;

        assert!(report.is_success());
        assert_eq!(
            backend.events().entries(),
            vec!["stopped:listener", "close:redis", "close:postgres"]
        );
    }

    #[tokio::test]
    async fn test_relational_refused_fails_before_listening() {
        let backend = FakeBackend::healthy().with_relational(PoolBehavior::RefuseConnect);
        let mut app = Application::new(test_config("127.0.0.1:0"), backend.clone());

        let err = app.start().await.unwrap_err();

        assert!(matches!(err, StartupError::Pool(PoolError::Open { .. })));
        assert_eq!(app.listener_state(), ListenerState::Created);
        assert_eq!(backend.cache_pool().connect_calls(), 0);
    }

    #[tokio::test]
    async fn test_cache_probe_timeout_releases_relational_pool() {
        let backend = FakeBackend::healthy().with_cache(PoolBehavior::HangPing);
        let mut app = Application::new(test_config("127.0.0.1:0"), backend.clone());

        let err = app.start().await.unwrap_err();

        assert!(matches!(
            err,
            StartupError::Pool(PoolError::CacheUnavailable { .. })
        ));
        assert_eq!(app.listener_state(), ListenerState::Created);
        assert_eq!(backend.relational_pool().close_calls(), 1);
        assert_eq!(backend.cache_pool().close_calls(), 1);
    }

    #[tokio::test]
    async fn test_bind_failure_releases_both_pools() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = occupied.local_addr().unwrap().to_string();
        let backend = FakeBackend::healthy();
        let mut app = Application::new(test_config(&addr), backend.clone());

        let err = app.start().await.unwrap_err();

        assert!(matches!(err, StartupError::ListenerBind { .. }));
        assert_eq!(app.listener_state(), ListenerState::Created);
        assert_eq!(
            backend.events().entries(),
            vec!["close:redis", "close:postgres"]
        );
    }

    #[tokio::test]
    async fn test_shutdown_reports_pool_close_failure() {
        let backend = FakeBackend::healthy().with_cache(PoolBehavior::FailClose);
        let mut app = Application::new(test_config("127.0.0.1:0"), backend.clone());
        app.start().await.unwrap();

        let report = app.shutdown(async {}).await;

        assert_eq!(report.exit_code(), 1);
        assert!(report.status_line().contains("redis"));
        assert_eq!(backend.relational_pool().close_calls(), 1);
    }
}
