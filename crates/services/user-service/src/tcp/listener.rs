//! TCP listener supervisor.
//!
//! The accept loop runs on its own task. `stop` tells it to quit accepting,
//! flips the drain signal every connection holds, waits for connections up
//! to the given timeout and aborts the rest.
//!
//! State moves `Created -> Running -> Draining -> Stopped` and never back.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use common::{ShutdownError, StartupError};

/// Pause after a failed accept (e.g. out of file descriptors)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Created,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ListenerState::Created => "created",
            ListenerState::Running => "running",
            ListenerState::Draining => "draining",
            ListenerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Tells a connection that the listener is draining.
///
/// Handlers finish the request in flight and then close.
#[derive(Debug, Clone)]
pub struct DrainSignal {
    rx: watch::Receiver<bool>,
}

impl DrainSignal {
    /// Resolves once draining has begun (or the listener is gone).
    pub async fn draining(&mut self) {
        let _ = self.rx.wait_for(|draining| *draining).await;
    }
}

impl From<watch::Receiver<bool>> for DrainSignal {
    fn from(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }
}

/// Serves one accepted connection.
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    async fn handle(&self, stream: TcpStream, peer: SocketAddr, drain: DrainSignal);
}

/// Result of the drain phase, reported by the accept task.
#[derive(Debug)]
struct DrainOutcome {
    forced: usize,
    timeout: Duration,
}

/// Owns the listening socket's task and its lifecycle.
pub struct ListenerSupervisor {
    state: ListenerState,
    local_addr: Option<SocketAddr>,
    stop_tx: Option<oneshot::Sender<Duration>>,
    accept_task: Option<JoinHandle<DrainOutcome>>,
}

impl Default for ListenerSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ListenerSupervisor {
    pub fn new() -> Self {
        Self {
            state: ListenerState::Created,
            local_addr: None,
            stop_tx: None,
            accept_task: None,
        }
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    /// Bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Bind `addr` and start accepting on a background task.
    ///
    /// `":3001"` binds every interface, dual-stack where IPv6 is available.
    /// Returns once the socket is bound.
    pub async fn start(
        &mut self,
        addr: &str,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<SocketAddr, StartupError> {
        if self.state != ListenerState::Created {
            return Err(StartupError::ListenerState(self.state.to_string()));
        }

        let (listener, bind_addr) = bind(addr).await?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| StartupError::ListenerBind {
                addr: bind_addr,
                reason: e.to_string(),
            })?;

        let (stop_tx, stop_rx) = oneshot::channel();
        self.accept_task = Some(tokio::spawn(accept_loop(listener, handler, stop_rx)));
        self.stop_tx = Some(stop_tx);
        self.local_addr = Some(local_addr);
        self.state = ListenerState::Running;

        info!(addr = %local_addr, "TCP listener started");
        Ok(local_addr)
    }

    /// Stop accepting and drain connections for at most `drain_timeout`.
    ///
    /// A no-op unless the listener is running. Connections still open at the
    /// deadline are aborted and reported as `DrainTimeout`; the listener ends
    /// up `Stopped` either way.
    pub async fn stop(&mut self, drain_timeout: Duration) -> Result<(), ShutdownError> {
        if self.state != ListenerState::Running {
            debug!(state = %self.state, "Listener not running, nothing to stop");
            return Ok(());
        }

        self.state = ListenerState::Draining;
        info!(timeout = ?drain_timeout, "Draining TCP listener");

        if let Some(stop_tx) = self.stop_tx.take() {
            // The accept task only ends after receiving this
            let _ = stop_tx.send(drain_timeout);
        }

        let result = match self.accept_task.take() {
            Some(task) => match task.await {
                Ok(DrainOutcome { forced: 0, .. }) => Ok(()),
                Ok(DrainOutcome { forced, timeout }) => {
                    Err(ShutdownError::DrainTimeout { forced, timeout })
                }
                Err(e) => Err(ShutdownError::ListenerTask(e.to_string())),
            },
            None => Ok(()),
        };

        self.state = ListenerState::Stopped;
        self.local_addr = None;
        match &result {
            Ok(()) => info!("TCP listener stopped"),
            Err(e) => warn!(error = %e, "TCP listener stopped with errors"),
        }
        result
    }
}

/// Addresses to try, in order. Go-style `":port"` means every interface:
/// `[::]` first (dual-stack on most systems), then IPv4 only.
fn bind_candidates(addr: &str) -> Vec<String> {
    if addr.starts_with(':') {
        vec![format!("[::]{}", addr), format!("0.0.0.0{}", addr)]
    } else {
        vec![addr.to_string()]
    }
}

async fn bind(addr: &str) -> Result<(TcpListener, String), StartupError> {
    let mut last_err = StartupError::ListenerBind {
        addr: addr.to_string(),
        reason: "no address to bind".to_string(),
    };

    for candidate in bind_candidates(addr) {
        match TcpListener::bind(&candidate).await {
            Ok(listener) => return Ok((listener, candidate)),
            Err(e) => {
                debug!(addr = %candidate, error = %e, "Bind attempt failed");
                last_err = StartupError::ListenerBind {
                    addr: candidate,
                    reason: e.to_string(),
                };
            }
        }
    }

    Err(last_err)
}

async fn accept_loop(
    listener: TcpListener,
    handler: Arc<dyn ConnectionHandler>,
    mut stop_rx: oneshot::Receiver<Duration>,
) -> DrainOutcome {
    let (drain_tx, drain_rx) = watch::channel(false);
    let mut connections = JoinSet::new();

    let drain_timeout = loop {
        tokio::select! {
            stop = &mut stop_rx => {
                // Supervisor dropped without stopping: drain without waiting
                break stop.unwrap_or(Duration::ZERO);
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "Accepted connection");
                    let handler = Arc::clone(&handler);
                    let drain = DrainSignal::from(drain_rx.clone());
                    connections.spawn(async move {
                        handler.handle(stream, peer, drain).await;
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = finished {
                    if e.is_panic() {
                        error!(error = %e, "Connection task panicked");
                    }
                }
            }
        }
    };

    drop(listener);
    drain_tx.send_replace(true);
    info!(active = connections.len(), "Stopped accepting, draining connections");

    let drained = timeout(drain_timeout, async {
        while connections.join_next().await.is_some() {}
    })
    .await;

    let forced = match drained {
        Ok(()) => 0,
        Err(_) => {
            let forced = connections.len();
            warn!(forced, "Drain timeout reached, aborting remaining connections");
            connections.shutdown().await;
            forced
        }
    };

    DrainOutcome {
        forced,
        timeout: drain_timeout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::Notify;

    /// Echoes bytes until drained.
    struct Echo;

    #[async_trait]
    impl ConnectionHandler for Echo {
        async fn handle(&self, mut stream: TcpStream, _peer: SocketAddr, mut drain: DrainSignal) {
            let mut buf = [0u8; 64];
            loop {
                tokio::select! {
                    _ = drain.draining() => return,
                    read = stream.read(&mut buf) => match read {
                        Ok(0) | Err(_) => return,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                return;
                            }
                        }
                    },
                }
            }
        }
    }

    /// Ignores the drain signal and never returns.
    struct Stubborn {
        accepted: Arc<Notify>,
    }

    #[async_trait]
    impl ConnectionHandler for Stubborn {
        async fn handle(&self, _stream: TcpStream, _peer: SocketAddr, _drain: DrainSignal) {
            self.accepted.notify_one();
            std::future::pending::<()>().await;
        }
    }

    #[test]
    fn test_bare_port_tries_dual_stack_first() {
        assert_eq!(bind_candidates(":3001"), vec!["[::]:3001", "0.0.0.0:3001"]);
        assert_eq!(bind_candidates("127.0.0.1:3001"), vec!["127.0.0.1:3001"]);
    }

    #[tokio::test]
    async fn test_bare_port_binds_every_interface() {
        let mut listener = ListenerSupervisor::new();

        let addr = listener.start(":0", Arc::new(Echo)).await.unwrap();

        assert!(addr.ip().is_unspecified());
        assert_ne!(addr.port(), 0);
        listener.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_start_then_stop() {
        let mut listener = ListenerSupervisor::new();
        assert_eq!(listener.state(), ListenerState::Created);

        let addr = listener.start("127.0.0.1:0", Arc::new(Echo)).await.unwrap();
        assert_eq!(listener.state(), ListenerState::Running);
        assert_eq!(listener.local_addr(), Some(addr));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"hi").await.unwrap();
        let mut buf = [0u8; 2];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");

        listener.stop(Duration::from_secs(1)).await.unwrap();
        assert_eq!(listener.state(), ListenerState::Stopped);
        assert!(listener.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let mut listener = ListenerSupervisor::new();
        listener.start("127.0.0.1:0", Arc::new(Echo)).await.unwrap();

        let err = listener.start("127.0.0.1:0", Arc::new(Echo)).await.unwrap_err();

        assert!(matches!(err, StartupError::ListenerState(ref s) if s == "running"));
        listener.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_before_start_is_noop() {
        let mut listener = ListenerSupervisor::new();
        listener.stop(Duration::from_secs(1)).await.unwrap();
        assert_eq!(listener.state(), ListenerState::Created);
    }

    #[tokio::test]
    async fn test_drain_timeout_aborts_stubborn_connection() {
        let accepted = Arc::new(Notify::new());
        let mut listener = ListenerSupervisor::new();
        let addr = listener
            .start(
                "127.0.0.1:0",
                Arc::new(Stubborn {
                    accepted: accepted.clone(),
                }),
            )
            .await
            .unwrap();

        let _client = TcpStream::connect(addr).await.unwrap();
        accepted.notified().await;

        let err = listener.stop(Duration::from_millis(50)).await.unwrap_err();

        assert_eq!(
            err,
            ShutdownError::DrainTimeout {
                forced: 1,
                timeout: Duration::from_millis(50)
            }
        );
        assert_eq!(listener.state(), ListenerState::Stopped);
    }
}
