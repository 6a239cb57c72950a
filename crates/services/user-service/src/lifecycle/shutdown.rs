//! Ordered teardown.
//!
//! On the shutdown signal the listener is drained first, then the pools are
//! closed. The second step always runs, even when draining failed, and every
//! failure ends up in the [`ShutdownReport`].

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, warn};

use common::{AggregatedCloseError, ShutdownError};

use crate::infra::{Backend, PoolManager};
use crate::tcp::ListenerSupervisor;

/// First teardown step.
#[async_trait]
pub trait ListenerControl: Send {
    async fn stop_listener(&mut self, drain_timeout: Duration) -> Result<(), ShutdownError>;
}

/// Second teardown step.
#[async_trait]
pub trait PoolTeardown: Send {
    async fn close_pools(&mut self) -> Result<(), AggregatedCloseError>;
}

#[async_trait]
impl ListenerControl for ListenerSupervisor {
    async fn stop_listener(&mut self, drain_timeout: Duration) -> Result<(), ShutdownError> {
        self.stop(drain_timeout).await
    }
}

#[async_trait]
impl<B: Backend> PoolTeardown for PoolManager<B> {
    async fn close_pools(&mut self) -> Result<(), AggregatedCloseError> {
        self.close_all().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    Listener,
    Pools,
}

impl fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownPhase::Listener => f.write_str("listener"),
            ShutdownPhase::Pools => f.write_str("pools"),
        }
    }
}

/// Outcome of the teardown, phase by phase.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    failures: Vec<(ShutdownPhase, ShutdownError)>,
}

impl ShutdownReport {
    fn record(&mut self, phase: ShutdownPhase, err: ShutdownError) {
        self.failures.push((phase, err));
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failures(&self) -> &[(ShutdownPhase, ShutdownError)] {
        &self.failures
    }

    /// Final human-readable status.
    pub fn status_line(&self) -> String {
        if self.failures.is_empty() {
            return "Service shutdown completed successfully".to_string();
        }

        let details: Vec<String> = self
            .failures
            .iter()
            .map(|(phase, err)| format!("{}: {}", phase, err))
            .collect();
        format!(
            "Service shutdown completed with {} error(s): {}",
            self.failures.len(),
            details.join("; ")
        )
    }

    /// Process exit status for this outcome.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

/// Drives the ordered teardown once the shutdown signal fires.
#[derive(Debug, Clone, Copy)]
pub struct ShutdownOrchestrator {
    drain_timeout: Duration,
}

impl ShutdownOrchestrator {
    pub fn new(drain_timeout: Duration) -> Self {
        Self { drain_timeout }
    }

    /// Wait for `signal`, then stop the listener and close the pools.
    pub async fn run<S, L, P>(&self, signal: S, listener: &mut L, pools: &mut P) -> ShutdownReport
    where
        S: Future<Output = ()>,
        L: ListenerControl + ?Sized,
        P: PoolTeardown + ?Sized,
    {
        signal.await;
        info!("Received shutdown signal, initiating graceful shutdown...");
        self.teardown(listener, pools).await
    }

    /// Stop the listener, then close the pools. No signal involved.
    pub async fn teardown<L, P>(&self, listener: &mut L, pools: &mut P) -> ShutdownReport
    where
        L: ListenerControl + ?Sized,
        P: PoolTeardown + ?Sized,
    {
        let mut report = ShutdownReport::default();

        if let Err(e) = listener.stop_listener(self.drain_timeout).await {
            warn!(error = %e, "Error shutting down TCP listener");
            report.record(ShutdownPhase::Listener, e);
        }

        if let Err(e) = pools.close_pools().await {
            error!(error = %e, "Error closing pools");
            report.record(ShutdownPhase::Pools, ShutdownError::Close(e));
        }

        report
    }
}

/// Resolves on SIGINT or SIGTERM (Ctrl+C where there are no unix signals).
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = sigint.recv() => info!("Received SIGINT"),
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Failed to install signal handlers, falling back to Ctrl+C");
                ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c().await;
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C"),
        Err(e) => error!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
    }
}
