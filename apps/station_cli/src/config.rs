use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use duet_client::{transport::Deployment, SupervisorConfig};
use serde::{
    de::{value::StrDeserializer, IntoDeserializer},
    Deserialize,
};

pub const SETTINGS_FILE: &str = "station.toml";
const ENV_PREFIX: &str = "STATION__";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Host of the firmware's HTTP interface.
    pub address: Option<String>,
    /// `socket`, `http` or `simulated`.
    pub deployment: Deployment,
    pub socket_path: PathBuf,
    pub poll_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub idle_timeout_ms: u64,
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub command_timeout_ms: Option<u64>,
    pub deck_config_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        let supervisor = SupervisorConfig::default();
        Self {
            address: None,
            deployment: Deployment::Socket,
            socket_path: PathBuf::from(default_socket_path()),
            poll_interval_ms: millis(supervisor.poll_interval),
            connect_timeout_ms: millis(supervisor.connect_timeout),
            idle_timeout_ms: millis(supervisor.idle_timeout),
            reconnect_attempts: supervisor.reconnect_attempts,
            reconnect_delay_ms: millis(supervisor.reconnect_delay),
            command_timeout_ms: None,
            deck_config_path: PathBuf::from("deck_config.json"),
        }
    }
}

#[cfg(unix)]
fn default_socket_path() -> &'static str {
    duet_client::transport::socket::DEFAULT_SOCKET_PATH
}

#[cfg(not(unix))]
fn default_socket_path() -> &'static str {
    ""
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Settings {
    /// Reads `path` (or `station.toml` when present), then applies
    /// `STATION__*` environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(SETTINGS_FILE).exists() => {
                Self::from_file(Path::new(SETTINGS_FILE))?
            }
            None => Self::default(),
        };
        settings.apply_overrides(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("invalid settings file '{}'", path.display()))
    }

    /// Applies overrides looked up by upper-case field name.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<()> {
        if let Some(v) = lookup("ADDRESS") {
            self.address = Some(v);
        }
        if let Some(v) = lookup("DEPLOYMENT") {
            let value: StrDeserializer<'_, serde::de::value::Error> = v.as_str().into_deserializer();
            self.deployment = Deployment::deserialize(value)
                .with_context(|| format!("{ENV_PREFIX}DEPLOYMENT is not a deployment: {v}"))?;
        }
        if let Some(v) = lookup("SOCKET_PATH") {
            self.socket_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("DECK_CONFIG_PATH") {
            self.deck_config_path = PathBuf::from(v);
        }
        override_number(&lookup, "POLL_INTERVAL_MS", &mut self.poll_interval_ms)?;
        override_number(&lookup, "CONNECT_TIMEOUT_MS", &mut self.connect_timeout_ms)?;
        override_number(&lookup, "IDLE_TIMEOUT_MS", &mut self.idle_timeout_ms)?;
        override_number(&lookup, "RECONNECT_ATTEMPTS", &mut self.reconnect_attempts)?;
        override_number(&lookup, "RECONNECT_DELAY_MS", &mut self.reconnect_delay_ms)?;
        if let Some(v) = lookup("COMMAND_TIMEOUT_MS") {
            let parsed = v
                .parse()
                .with_context(|| format!("{ENV_PREFIX}COMMAND_TIMEOUT_MS is not a number: {v}"))?;
            self.command_timeout_ms = Some(parsed);
        }
        Ok(())
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            idle_timeout: Duration::from_millis(self.idle_timeout_ms),
            reconnect_attempts: self.reconnect_attempts,
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            command_timeout: self.command_timeout_ms.map(Duration::from_millis),
        }
    }
}

fn override_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) -> anyhow::Result<()>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(v) = lookup(key) {
        *target = v
            .parse()
            .with_context(|| format!("{ENV_PREFIX}{key} is not a number: {v}"))?;
    }
    Ok(())
}
