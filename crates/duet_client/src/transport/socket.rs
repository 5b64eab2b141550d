use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use shared::{
    error::FrameError,
    protocol::{
        BaseResponse, ClientInitMessage, FeedCommand, ServerInitMessage, SimpleCodeRequest,
        SubscriptionMode, PROTOCOL_VERSION,
    },
};
use tokio::{
    io::AsyncWriteExt,
    net::{
        unix::{OwnedReadHalf, OwnedWriteHalf},
        UnixStream,
    },
    sync::Mutex,
    time::timeout,
};
use tracing::{debug, info, warn};

use super::{
    framing::JsonFrameReader, CommandTransport, Deployment, StateFeed, TransportConnector,
};
use crate::{
    command::CommandChannel,
    error::{DuetError, Result},
};

pub const DEFAULT_SOCKET_PATH: &str = "/var/run/dsf/dcs.sock";

/// Connects to the control server over its local unix socket.
#[derive(Debug, Clone)]
pub struct SocketConnector {
    path: PathBuf,
    connect_timeout: Duration,
}

impl SocketConnector {
    pub fn new(path: impl Into<PathBuf>, connect_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            connect_timeout,
        }
    }
}

#[async_trait]
impl TransportConnector for SocketConnector {
    fn deployment(&self) -> Deployment {
        Deployment::Socket
    }

    async fn open_commands(&self) -> Result<CommandChannel> {
        let connection =
            SocketConnection::open(&self.path, ClientInitMessage::command(), self.connect_timeout)
                .await?;
        info!(path = %self.path.display(), "socket: command connection established");
        Ok(CommandChannel::new(Arc::new(SocketCommandTransport {
            connection: Mutex::new(Some(connection)),
        })))
    }

    async fn open_feed(&self) -> Result<Box<dyn StateFeed>> {
        Ok(Box::new(SocketFeed {
            path: self.path.clone(),
            connect_timeout: self.connect_timeout,
            connection: None,
        }))
    }
}

struct SocketConnection {
    reader: JsonFrameReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl SocketConnection {
    async fn open(path: &Path, init: ClientInitMessage, connect_timeout: Duration) -> Result<Self> {
        let stream = timeout(connect_timeout, UnixStream::connect(path))
            .await
            .map_err(|_| {
                DuetError::Connection(format!("timed out connecting to {}", path.display()))
            })?
            .map_err(|err| {
                DuetError::Connection(format!("failed to connect to {}: {err}", path.display()))
            })?;
        let (read, write) = stream.into_split();
        let mut connection = Self {
            reader: JsonFrameReader::new(read),
            writer: write,
        };

        let server_init = connection.read_within(connect_timeout, "server init").await?;
        let server_init: ServerInitMessage = serde_json::from_value(server_init)
            .map_err(|err| DuetError::Connection(format!("invalid server init message: {err}")))?;
        if server_init.version < PROTOCOL_VERSION {
            warn!(
                server_version = server_init.version,
                client_version = PROTOCOL_VERSION,
                "socket: control server speaks an older protocol version"
            );
        }

        connection.write_json(&init).await?;
        let reply = connection.read_within(connect_timeout, "handshake reply").await?;
        let reply: BaseResponse = serde_json::from_value(reply)
            .map_err(|err| DuetError::Connection(format!("invalid handshake reply: {err}")))?;
        if !reply.success {
            return Err(DuetError::Connection(format!(
                "handshake rejected: {}",
                reply.into_text()
            )));
        }
        Ok(connection)
    }

    async fn read_within(&mut self, limit: Duration, what: &str) -> Result<Value> {
        let frame = timeout(limit, self.reader.next_frame())
            .await
            .map_err(|_| DuetError::Connection(format!("timed out waiting for {what}")))??;
        Ok(frame)
    }

    async fn write_json<T: Serialize>(&mut self, message: &T) -> Result<()> {
        let bytes =
            serde_json::to_vec(message).map_err(|err| DuetError::Transport(err.to_string()))?;
        self.writer
            .write_all(&bytes)
            .await
            .map_err(|err| DuetError::Transport(format!("socket write failed: {err}")))
    }
}

/// Command connection; dropped after a failed exchange, since a late reply
/// would otherwise be read as the answer to the next code.
struct SocketCommandTransport {
    connection: Mutex<Option<SocketConnection>>,
}

#[async_trait]
impl CommandTransport for SocketCommandTransport {
    async fn send_code(&self, code: &str, limit: Option<Duration>) -> Result<String> {
        let mut slot = self.connection.lock().await;
        let connection = slot.as_mut().ok_or(DuetError::NotConnected)?;
        let exchange = async {
            connection.write_json(&SimpleCodeRequest::new(code)).await?;
            let frame = connection.reader.next_frame().await?;
            Ok::<_, DuetError>(frame)
        };
        let outcome = match limit {
            Some(limit) => timeout(limit, exchange).await.unwrap_or_else(|_| {
                Err(DuetError::Transport(format!(
                    "no reply to `{code}` within {limit:?}"
                )))
            }),
            None => exchange.await,
        };
        match outcome {
            Ok(frame) => Ok(reply_text(frame)),
            Err(err) => {
                if let Some(mut connection) = slot.take() {
                    let _ = connection.writer.shutdown().await;
                }
                warn!(code, %err, "socket: command connection dropped");
                Err(err)
            }
        }
    }

    async fn close(&self) {
        if let Some(mut connection) = self.connection.lock().await.take() {
            if let Err(err) = connection.writer.shutdown().await {
                debug!(%err, "socket: command connection already closed");
            }
        }
    }
}

fn reply_text(frame: Value) -> String {
    match frame {
        Value::String(text) => text,
        Value::Object(_) => match serde_json::from_value::<BaseResponse>(frame.clone()) {
            Ok(response) => response.into_text(),
            Err(_) => frame.to_string(),
        },
        other => other.to_string(),
    }
}

struct SocketFeed {
    path: PathBuf,
    connect_timeout: Duration,
    connection: Option<SocketConnection>,
}

#[async_trait]
impl StateFeed for SocketFeed {
    async fn subscribe(&mut self) -> Result<Value> {
        let mut connection = SocketConnection::open(
            &self.path,
            ClientInitMessage::subscribe(SubscriptionMode::Patch),
            self.connect_timeout,
        )
        .await?;
        let document = connection
            .read_within(self.connect_timeout, "initial object model")
            .await?;
        self.connection = Some(connection);
        info!(path = %self.path.display(), "socket: subscribed to object model patches");
        Ok(document)
    }

    async fn next_patch(&mut self) -> Result<Value> {
        let connection = self.connection.as_mut().ok_or(DuetError::NotConnected)?;
        connection.write_json(&FeedCommand::Acknowledge).await?;
        let patch = connection.reader.next_frame().await.map_err(|err| match err {
            FrameError::Io(err) => DuetError::Transport(format!("socket read failed: {err}")),
            other => DuetError::Frame(other),
        })?;
        Ok(patch)
    }

    async fn close(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            let _ = connection.writer.shutdown().await;
        }
    }
}

#[cfg(test)]
#[path = "../tests/socket_tests.rs"]
mod tests;
