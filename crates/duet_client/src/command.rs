use std::{fmt, sync::Arc, time::Duration};

use shared::protocol::ERROR_MARKER;
use tracing::{debug, info};

use crate::{
    error::{DuetError, Result},
    simulated::SimulatedMachine,
    transport::CommandTransport,
};

/// Request/reply channel for G-codes.
///
/// Cheap to clone; every clone talks to the same transport.
#[derive(Clone)]
pub struct CommandChannel {
    mode: ChannelMode,
}

#[derive(Clone)]
enum ChannelMode {
    Live(Arc<dyn CommandTransport>),
    Simulated(SimulatedMachine),
}

impl fmt::Debug for CommandChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.mode {
            ChannelMode::Live(_) => "live",
            ChannelMode::Simulated(_) => "simulated",
        };
        f.debug_struct("CommandChannel").field("mode", &mode).finish()
    }
}

impl CommandChannel {
    pub fn new(transport: Arc<dyn CommandTransport>) -> Self {
        Self {
            mode: ChannelMode::Live(transport),
        }
    }

    pub fn simulated(machine: SimulatedMachine) -> Self {
        Self {
            mode: ChannelMode::Simulated(machine),
        }
    }

    pub fn is_simulated(&self) -> bool {
        matches!(self.mode, ChannelMode::Simulated(_))
    }

    pub async fn send(&self, code: &str) -> Result<String> {
        self.send_with_timeout(code, None).await
    }

    /// Sends `code` and returns the reply text.
    ///
    /// Replies carrying the firmware error marker become
    /// [`DuetError::RemoteCommand`]. Simulated channels reply with an empty
    /// string unless the machine was told to reject the code.
    pub async fn send_with_timeout(&self, code: &str, timeout: Option<Duration>) -> Result<String> {
        let reply = match &self.mode {
            ChannelMode::Simulated(machine) => {
                info!(code, "command: simulated send");
                machine.execute(code).await
            }
            ChannelMode::Live(transport) => transport.send_code(code, timeout).await?,
        };
        debug!(code, reply = reply.trim(), "command: reply received");
        if reply.contains(ERROR_MARKER) {
            return Err(DuetError::RemoteCommand {
                command: code.to_string(),
                reply: reply.trim().to_string(),
            });
        }
        Ok(reply)
    }

    pub async fn close(&self) {
        if let ChannelMode::Live(transport) = &self.mode {
            transport.close().await;
        }
    }
}
