use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{command::CommandChannel, error::Result};

pub mod framing;
pub mod http;
#[cfg(unix)]
pub mod socket;

pub use http::HttpConnector;
#[cfg(unix)]
pub use socket::SocketConnector;

/// Where the firmware control server is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Deployment {
    /// Local unix socket of the control server.
    Socket,
    /// HTTP for commands, WebSocket for the object model.
    Http,
    /// In-memory machine, no I/O.
    Simulated,
}

#[async_trait]
pub trait CommandTransport: Send + Sync {
    /// Sends one code and returns the firmware's reply text.
    async fn send_code(&self, code: &str, timeout: Option<Duration>) -> Result<String>;

    async fn close(&self) {}
}

#[async_trait]
pub trait StateFeed: Send {
    /// Performs the subscribe handshake and returns the full object model.
    async fn subscribe(&mut self) -> Result<Value>;

    /// Acknowledges the previous frame and waits for the next patch.
    async fn next_patch(&mut self) -> Result<Value>;

    async fn close(&mut self) {}
}

#[async_trait]
pub trait TransportConnector: Send + Sync {
    fn deployment(&self) -> Deployment;

    async fn open_commands(&self) -> Result<CommandChannel>;

    async fn open_feed(&self) -> Result<Box<dyn StateFeed>>;
}
