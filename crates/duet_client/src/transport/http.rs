use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use reqwest::Client;
use serde_json::Value;
use shared::{
    error::FrameError,
    protocol::{WS_ACKNOWLEDGE, WS_PING, WS_PONG},
};
use tokio::{net::TcpStream, time::timeout};
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info};
use url::Url;

use super::{framing::decode_text_frame, CommandTransport, Deployment, StateFeed, TransportConnector};
use crate::{
    command::CommandChannel,
    error::{DuetError, Result},
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Code used to check that the control server answers before a session starts.
const PING_CODE: &str = "M409 K\"state.status\"";

/// Connects to a control server exposed over HTTP and WebSocket.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    base_url: Url,
    http: Client,
    connect_timeout: Duration,
}

impl HttpConnector {
    /// `address` is either `host[:port]` or a full `http(s)://` URL.
    pub fn new(address: &str, connect_timeout: Duration) -> Result<Self> {
        let raw = if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!("http://{address}")
        };
        let base_url = Url::parse(&raw)
            .map_err(|err| DuetError::Connection(format!("invalid address `{address}`: {err}")))?;
        Ok(Self {
            base_url,
            http: Client::new(),
            connect_timeout,
        })
    }

    pub fn code_url(&self) -> Result<Url> {
        self.base_url
            .join("machine/code")
            .map_err(|err| DuetError::Connection(err.to_string()))
    }

    pub fn feed_url(&self) -> Result<Url> {
        let mut url = self
            .base_url
            .join("machine")
            .map_err(|err| DuetError::Connection(err.to_string()))?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| DuetError::Connection(format!("cannot derive websocket url from {url}")))?;
        Ok(url)
    }
}

#[async_trait]
impl TransportConnector for HttpConnector {
    fn deployment(&self) -> Deployment {
        Deployment::Http
    }

    async fn open_commands(&self) -> Result<CommandChannel> {
        let transport = HttpCommandTransport {
            http: self.http.clone(),
            code_url: self.code_url()?,
        };
        transport
            .send_code(PING_CODE, Some(self.connect_timeout))
            .await
            .map_err(|err| DuetError::Connection(format!("control server unreachable: {err}")))?;
        info!(url = %transport.code_url, "http: command endpoint reachable");
        Ok(CommandChannel::new(Arc::new(transport)))
    }

    async fn open_feed(&self) -> Result<Box<dyn StateFeed>> {
        Ok(Box::new(HttpFeed {
            url: self.feed_url()?,
            connect_timeout: self.connect_timeout,
            socket: None,
        }))
    }
}

struct HttpCommandTransport {
    http: Client,
    code_url: Url,
}

#[async_trait]
impl CommandTransport for HttpCommandTransport {
    async fn send_code(&self, code: &str, limit: Option<Duration>) -> Result<String> {
        let mut request = self.http.post(self.code_url.clone()).body(code.to_string());
        if let Some(limit) = limit {
            request = request.timeout(limit);
        }
        let response = request
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| DuetError::Transport(format!("failed to send `{code}`: {err}")))?;
        response
            .text()
            .await
            .map_err(|err| DuetError::Transport(format!("failed to read reply to `{code}`: {err}")))
    }
}

struct HttpFeed {
    url: Url,
    connect_timeout: Duration,
    socket: Option<WsStream>,
}

impl HttpFeed {
    async fn read_frame(&mut self) -> Result<Value> {
        let socket = self.socket.as_mut().ok_or(DuetError::NotConnected)?;
        while let Some(message) = socket.next().await {
            let message = message
                .map_err(|err| DuetError::Transport(format!("websocket receive failed: {err}")))?;
            match message {
                Message::Text(text) if text == WS_PING => {
                    socket
                        .send(Message::Text(WS_PONG.to_string()))
                        .await
                        .map_err(|err| DuetError::Transport(format!("websocket send failed: {err}")))?;
                }
                Message::Text(text) => return Ok(decode_text_frame(&text)?),
                Message::Close(_) => break,
                _ => {}
            }
        }
        Err(FrameError::Closed.into())
    }
}

#[async_trait]
impl StateFeed for HttpFeed {
    async fn subscribe(&mut self) -> Result<Value> {
        let (socket, _) = timeout(self.connect_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| DuetError::Connection(format!("timed out connecting to {}", self.url)))?
            .map_err(|err| DuetError::Connection(format!("failed to connect to {}: {err}", self.url)))?;
        self.socket = Some(socket);
        let document = timeout(self.connect_timeout, self.read_frame())
            .await
            .map_err(|_| DuetError::Connection("timed out waiting for object model".into()))??;
        info!(url = %self.url, "http: subscribed to object model");
        Ok(document)
    }

    async fn next_patch(&mut self) -> Result<Value> {
        let socket = self.socket.as_mut().ok_or(DuetError::NotConnected)?;
        socket
            .send(Message::Text(WS_ACKNOWLEDGE.to_string()))
            .await
            .map_err(|err| DuetError::Transport(format!("websocket send failed: {err}")))?;
        self.read_frame().await
    }

    async fn close(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            if let Err(err) = socket.close(None).await {
                debug!(%err, "http: websocket already closed");
            }
        }
    }
}

#[cfg(test)]
#[path = "../tests/http_tests.rs"]
mod tests;
