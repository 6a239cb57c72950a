//! Line-delimited JSON protocol.
//!
//! Each request is one JSON object on its own line, tagged by `op`:
//!
//! ```text
//! {"op":"register","email":"ada@example.com","password":"...","name":"Ada"}
//! {"status":"ok","data":{"id":"...","email":"ada@example.com",...}}
//! {"op":"me","token":"bad"}
//! {"status":"error","code":"AUTH_ERROR","message":"Invalid or expired token"}
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, warn};
use uuid::Uuid;

use common::{AppError, AppResult};
use domain::UserResponse;

use super::listener::{ConnectionHandler, DrainSignal};
use crate::service::UserService;

/// Longest request line accepted, newline excluded.
const MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request {
    Ping,
    Register {
        email: String,
        password: String,
        name: String,
    },
    Login {
        email: String,
        password: String,
    },
    GetUser {
        token: String,
        id: Uuid,
    },
    UpdateUser {
        token: String,
        name: String,
    },
    DeleteUser {
        token: String,
    },
    Me {
        token: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum Reply {
    Ok { data: Value },
    Error { code: &'static str, message: String },
}

impl Reply {
    fn data<T: Serialize>(data: T) -> AppResult<Self> {
        let data = serde_json::to_value(data)
            .map_err(|e| AppError::internal(format!("Response serialization error: {}", e)))?;
        Ok(Reply::Ok { data })
    }

    fn from_error(err: &AppError) -> Self {
        Reply::Error {
            code: err.code(),
            message: err.user_message(),
        }
    }
}

/// Serves [`UserService`] over a byte stream.
pub struct UserProtocol {
    service: Arc<dyn UserService>,
}

impl UserProtocol {
    pub fn new(service: Arc<dyn UserService>) -> Self {
        Self { service }
    }

    /// Answer requests until the peer hangs up or draining begins.
    ///
    /// A request already read is always answered before the drain is
    /// honored.
    pub async fn serve<S>(&self, stream: S, mut drain: DrainSignal) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = LineReader::new(reader);

        loop {
            let frame = tokio::select! {
                biased;
                _ = drain.draining() => break,
                frame = reader.next_frame() => frame?,
            };

            let reply = match frame {
                Frame::Eof => break,
                Frame::Line(line) if line.trim().is_empty() => continue,
                Frame::Line(line) => self.dispatch(&line).await,
                Frame::TooLong => {
                    warn!(limit = MAX_LINE_BYTES, "Request line too long, closing connection");
                    let err = AppError::bad_request(format!(
                        "request line exceeds {} bytes",
                        MAX_LINE_BYTES
                    ));
                    write_reply(&mut writer, &Reply::from_error(&err)).await?;
                    break;
                }
            };
            write_reply(&mut writer, &reply).await?;
        }

        writer.shutdown().await
    }

    async fn dispatch(&self, line: &str) -> Reply {
        let request = match serde_json::from_str::<Request>(line) {
            Ok(request) => request,
            Err(e) => {
                return Reply::from_error(&AppError::bad_request(format!("malformed request: {}", e)))
            }
        };

        match self.execute(request).await {
            Ok(reply) => reply,
            Err(e) => Reply::from_error(&e),
        }
    }

    async fn execute(&self, request: Request) -> AppResult<Reply> {
        match request {
            Request::Ping => Reply::data(json!({ "pong": true })),
            Request::Register {
                email,
                password,
                name,
            } => {
                let user = self.service.register(email, password, name).await?;
                Reply::data(UserResponse::from(user))
            }
            Request::Login { email, password } => {
                let token = self.service.login(email, password).await?;
                Reply::data(token)
            }
            Request::GetUser { token, id } => {
                self.service.authenticate(&token).await?;
                let user = self.service.get_user(id).await?;
                Reply::data(UserResponse::from(user))
            }
            Request::UpdateUser { token, name } => {
                let caller = self.service.authenticate(&token).await?;
                let user = self.service.update_user(caller.id, name).await?;
                Reply::data(UserResponse::from(user))
            }
            Request::DeleteUser { token } => {
                let caller = self.service.authenticate(&token).await?;
                self.service.delete_user(caller.id).await?;
                Reply::data(json!({ "deleted": caller.id }))
            }
            Request::Me { token } => {
                let caller = self.service.authenticate(&token).await?;
                Reply::data(UserResponse::from(caller))
            }
        }
    }
}

async fn write_reply<W: AsyncWrite + Unpin>(writer: &mut W, reply: &Reply) -> io::Result<()> {
    let mut bytes = serde_json::to_vec(reply)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await
}

enum Frame {
    Line(String),
    TooLong,
    Eof,
}

/// Newline-delimited reader that gives up past [`MAX_LINE_BYTES`].
///
/// Partial lines live in `buf`, so `next_frame` can be cancelled and
/// resumed without losing input.
struct LineReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            buf: Vec::new(),
        }
    }

    async fn next_frame(&mut self) -> io::Result<Frame> {
        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                if self.buf.is_empty() {
                    return Ok(Frame::Eof);
                }
                return Ok(self.take_line());
            }

            let (chunk, consumed, complete) = match available.iter().position(|b| *b == b'\n') {
                Some(i) => (&available[..i], i + 1, true),
                None => (available, available.len(), false),
            };
            if self.buf.len() + chunk.len() > MAX_LINE_BYTES {
                self.buf.clear();
                return Ok(Frame::TooLong);
            }
            self.buf.extend_from_slice(chunk);
            self.inner.consume(consumed);

            if complete {
                return Ok(self.take_line());
            }
        }
    }

    fn take_line(&mut self) -> Frame {
        let mut line = std::mem::take(&mut self.buf);
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Frame::Line(String::from_utf8_lossy(&line).into_owned())
    }
}

#[async_trait]
impl ConnectionHandler for UserProtocol {
    async fn handle(&self, stream: TcpStream, peer: SocketAddr, drain: DrainSignal) {
        match self.serve(stream, drain).await {
            Ok(()) => debug!(peer = %peer, "Connection closed"),
            Err(e) => warn!(peer = %peer, error = %e, "Connection ended with an I/O error"),
        }
    }
}
