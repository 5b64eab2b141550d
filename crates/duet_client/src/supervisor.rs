use std::{sync::Arc, time::Duration};

use shared::domain::{Axis, HomingState};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::{
    command::CommandChannel,
    error::{DuetError, Result},
    model::{AxisLimits, MachineModel, ToolOffset},
    properties::{parse_tool_reply, MachineProperties, TOOL_QUERY},
    simulated::SimulatedMachine,
    sync::{ModelHandle, ModelSynchronizer},
    transport::{Deployment, TransportConnector},
};

/// Board reset code.
pub const RESET_CODE: &str = "M999";

#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorConfig {
    pub poll_interval: Duration,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub command_timeout: Option<Duration>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            connect_timeout: Duration::from_secs(1),
            idle_timeout: Duration::from_secs(60),
            reconnect_attempts: 10,
            reconnect_delay: Duration::from_secs(1),
            command_timeout: None,
        }
    }
}

struct Session {
    channel: CommandChannel,
    synchronizer: ModelSynchronizer,
}

/// Owns the command channel and the synchronizer of one machine, along with
/// the state that has to be forgotten whenever the board resets.
pub struct ConnectionSupervisor {
    connector: Arc<dyn TransportConnector>,
    config: SupervisorConfig,
    session: Option<Session>,
    homing: HomingState,
    properties: MachineProperties,
}

impl ConnectionSupervisor {
    pub fn new(connector: Arc<dyn TransportConnector>, config: SupervisorConfig) -> Self {
        Self {
            connector,
            config,
            session: None,
            homing: HomingState::default(),
            properties: MachineProperties::default(),
        }
    }

    pub fn simulated(machine: &SimulatedMachine, config: SupervisorConfig) -> Self {
        Self::new(Arc::new(machine.connector()), config)
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn deployment(&self) -> Deployment {
        self.connector.deployment()
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Opens the command channel, starts the synchronizer and, on HTTP
    /// deployments, primes the cached machine properties.
    pub async fn connect(&mut self) -> Result<()> {
        if self.session.is_some() {
            debug!("supervisor: already connected");
            return Ok(());
        }
        let deployment = self.connector.deployment();
        let channel = self.connector.open_commands().await?;
        let synchronizer = match self.start_synchronizer().await {
            Ok(synchronizer) => synchronizer,
            Err(err) => {
                channel.close().await;
                return Err(err);
            }
        };

        self.homing = HomingState::default();
        self.properties.clear();
        if deployment == Deployment::Http {
            match MachineProperties::query(&channel).await {
                Ok(properties) => self.properties = properties,
                Err(err) => warn!(%err, "supervisor: could not prime machine properties"),
            }
        }
        self.session = Some(Session {
            channel,
            synchronizer,
        });
        info!(?deployment, "supervisor: connected");
        Ok(())
    }

    async fn start_synchronizer(&self) -> Result<ModelSynchronizer> {
        let feed = self.connector.open_feed().await?;
        ModelSynchronizer::start(feed, self.config.poll_interval).await
    }

    /// Resets the board and reconnects within the configured attempt budget.
    pub async fn reset(&mut self) -> Result<()> {
        if let Some(session) = self.session.as_mut() {
            session.synchronizer.stop().await;
            if let Err(err) = session.channel.send(RESET_CODE).await {
                warn!(%err, "supervisor: board reset reported an error");
            }
        }
        self.disconnect().await;
        self.homing = HomingState::default();
        self.properties.clear();
        info!("supervisor: board reset issued, reconnecting");
        self.reconnect().await
    }

    pub async fn reconnect(&mut self) -> Result<()> {
        let attempts = self.config.reconnect_attempts;
        for attempt in 1..=attempts {
            sleep(self.config.reconnect_delay).await;
            match self.connect().await {
                Ok(()) => {
                    info!(attempt, "supervisor: reconnected");
                    return Ok(());
                }
                Err(err) => warn!(attempt, %err, "supervisor: reconnect attempt failed"),
            }
        }
        Err(DuetError::ReconnectFailed { attempts })
    }

    /// Stops the synchronizer and closes the command channel. Safe to call
    /// when already disconnected.
    pub async fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.synchronizer.stop().await;
            session.channel.close().await;
            info!("supervisor: disconnected");
        }
    }

    pub fn channel(&self) -> Result<CommandChannel> {
        self.session
            .as_ref()
            .map(|session| session.channel.clone())
            .ok_or(DuetError::NotConnected)
    }

    pub fn model(&self) -> Result<ModelHandle> {
        self.session
            .as_ref()
            .map(|session| session.synchronizer.handle())
            .ok_or(DuetError::NotConnected)
    }

    pub async fn snapshot(&self) -> Result<MachineModel> {
        Ok(self.model()?.snapshot().await)
    }

    /// Sends `code` with the configured command timeout.
    pub async fn send(&self, code: &str) -> Result<String> {
        self.channel()?
            .send_with_timeout(code, self.config.command_timeout)
            .await
    }

    pub fn homing(&self) -> HomingState {
        self.homing
    }

    pub fn set_homed(&mut self, axis: Axis, homed: bool) {
        self.homing.set(axis, homed);
    }

    pub async fn active_tool_index(&mut self) -> Result<i32> {
        if let Some(tool) = self.properties.active_tool {
            return Ok(tool);
        }
        self.load_properties().await?;
        if let Some(tool) = self.properties.active_tool {
            return Ok(tool);
        }
        let reply = self.send(TOOL_QUERY).await?;
        let tool = parse_tool_reply(&reply)?;
        self.properties.active_tool = Some(tool);
        Ok(tool)
    }

    pub fn set_active_tool(&mut self, tool: i32) {
        self.properties.active_tool = Some(tool);
    }

    pub async fn tool_offsets(&mut self) -> Result<Vec<ToolOffset>> {
        if self.properties.tool_offsets.is_none() {
            self.load_properties().await?;
        }
        Ok(self.properties.tool_offsets.clone().unwrap_or_default())
    }

    pub async fn axis_limits(&mut self) -> Result<Vec<AxisLimits>> {
        if self.properties.axis_limits.is_none() {
            self.load_properties().await?;
        }
        Ok(self.properties.axis_limits.clone().unwrap_or_default())
    }

    async fn load_properties(&mut self) -> Result<()> {
        let model = self.snapshot().await?;
        self.properties.fill_from_model(&model);
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/supervisor_tests.rs"]
mod tests;
