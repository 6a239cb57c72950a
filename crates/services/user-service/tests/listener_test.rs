//! Listener lifecycle over real loopback TCP.
//!
//! The protocol handler runs on top of an in-memory user service, so no
//! database or Redis is needed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use uuid::Uuid;

use common::{AppError, AppResult, ShutdownError, StartupError};
use domain::User;
use user_service_lib::service::{TokenResponse, UserService};
use user_service_lib::tcp::{ListenerState, ListenerSupervisor, UserProtocol};

// =============================================================================
// In-memory service
// =============================================================================

/// Answers `login` only after `release` is notified.
struct SlowLoginService {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl UserService for SlowLoginService {
    async fn register(&self, email: String, password: String, name: String) -> AppResult<User> {
        Ok(User::new(Uuid::new_v4(), email, password, name))
    }

    async fn login(&self, _email: String, _password: String) -> AppResult<TokenResponse> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(TokenResponse {
            access_token: "slow-token".to_string(),
            token_type: "Bearer".to_string(),
            expires_in: 3600,
        })
    }

    async fn get_user(&self, _id: Uuid) -> AppResult<User> {
        Err(AppError::NotFound)
    }

    async fn update_user(&self, _id: Uuid, _name: String) -> AppResult<User> {
        Err(AppError::NotFound)
    }

    async fn delete_user(&self, _id: Uuid) -> AppResult<()> {
        Err(AppError::NotFound)
    }

    async fn authenticate(&self, _token: &str) -> AppResult<User> {
        Err(AppError::Unauthorized)
    }
}

struct Harness {
    listener: ListenerSupervisor,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl Harness {
    async fn start() -> (Self, std::net::SocketAddr) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let service = SlowLoginService {
            entered: entered.clone(),
            release: release.clone(),
        };

        let mut listener = ListenerSupervisor::new();
        let addr = listener
            .start(
                "127.0.0.1:0",
                Arc::new(UserProtocol::new(Arc::new(service))),
            )
            .await
            .expect("listener should bind loopback");

        (
            Self {
                listener,
                entered,
                release,
            },
            addr,
        )
    }
}

async fn send(stream: &mut TcpStream, line: &str) {
    stream
        .write_all(format!("{}\n", line).as_bytes())
        .await
        .unwrap();
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_idle_connections_close_on_stop() {
    let (mut harness, addr) = Harness::start().await;
    let stream = TcpStream::connect(addr).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    writer.write_all(b"{\"op\":\"ping\"}\n").await.unwrap();
    let reply = lines.next_line().await.unwrap().unwrap();
    assert!(reply.contains("\"status\":\"ok\""));

    tokio_test::assert_ok!(harness.listener.stop(Duration::from_secs(2)).await);

    assert_eq!(harness.listener.state(), ListenerState::Stopped);
    assert!(lines.next_line().await.unwrap().is_none());
}

#[tokio::test]
async fn test_in_flight_request_finishes_during_drain() {
    let (mut harness, addr) = Harness::start().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    send(
        &mut stream,
        r#"{"op":"login","email":"ada@example.com","password":"secret-pass"}"#,
    )
    .await;
    harness.entered.notified().await;

    let release = harness.release.clone();
    let stop = tokio::spawn(async move {
        let result = harness.listener.stop(Duration::from_secs(2)).await;
        (harness.listener, result)
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    release.notify_one();

    let mut reply = String::new();
    BufReader::new(&mut stream).read_line(&mut reply).await.unwrap();
    assert!(reply.contains("slow-token"));

    let (listener, result) = stop.await.unwrap();
    tokio_test::assert_ok!(result);
    assert_eq!(listener.state(), ListenerState::Stopped);
}

#[tokio::test]
async fn test_stuck_request_is_aborted_at_deadline() {
    let (mut harness, addr) = Harness::start().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    send(
        &mut stream,
        r#"{"op":"login","email":"ada@example.com","password":"secret-pass"}"#,
    )
    .await;
    harness.entered.notified().await;

    let err = harness
        .listener
        .stop(Duration::from_millis(100))
        .await
        .unwrap_err();

    assert!(matches!(err, ShutdownError::DrainTimeout { forced: 1, .. }));
    assert_eq!(harness.listener.state(), ListenerState::Stopped);
}

#[tokio::test]
async fn test_stop_twice_is_noop() {
    let (mut harness, _addr) = Harness::start().await;

    tokio_test::assert_ok!(harness.listener.stop(Duration::from_secs(1)).await);
    tokio_test::assert_ok!(harness.listener.stop(Duration::from_secs(1)).await);

    assert_eq!(harness.listener.state(), ListenerState::Stopped);
}

#[tokio::test]
async fn test_no_connections_accepted_after_stop() {
    let (mut harness, addr) = Harness::start().await;
    harness.listener.stop(Duration::from_secs(1)).await.unwrap();

    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_bind_failure_leaves_listener_created() {
    let (mut running, addr) = Harness::start().await;
    let service = SlowLoginService {
        entered: Arc::new(Notify::new()),
        release: Arc::new(Notify::new()),
    };

    let mut second = ListenerSupervisor::new();
    let err = second
        .start(
            &addr.to_string(),
            Arc::new(UserProtocol::new(Arc::new(service))),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, StartupError::ListenerBind { .. }));
    assert_eq!(second.state(), ListenerState::Created);
    tokio_test::assert_ok!(second.stop(Duration::from_secs(1)).await);
    assert_eq!(second.state(), ListenerState::Created);

    running.listener.stop(Duration::from_secs(1)).await.unwrap();
}
