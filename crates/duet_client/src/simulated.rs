//! In-memory stand-in for the firmware, used when no hardware is attached.
//!
//! Commands never touch the network. The machine interprets the handful of
//! codes the client issues (`G28`, `G92`, `G0`/`G1`, `G90`/`G91`, `T<n>`,
//! `M999`) into object model patches, applies them to its own document and
//! queues them for whichever feed is subscribed.

use std::{collections::VecDeque, sync::Arc};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use shared::domain::{Axis, NO_TOOL};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{
    command::CommandChannel,
    error::{DuetError, Result},
    model::MachineModel,
    transport::{Deployment, StateFeed, TransportConnector},
};

#[derive(Debug, Clone)]
pub struct SimulatedMachine {
    inner: Arc<Mutex<MachineState>>,
}

#[derive(Debug)]
struct MachineState {
    model: MachineModel,
    pending: VecDeque<Value>,
    commands: Vec<String>,
    open_attempts: u32,
    refuse_connections: bool,
    rejected: Vec<String>,
    absolute: bool,
}

impl Default for SimulatedMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedMachine {
    pub fn new() -> Self {
        Self::with_document(default_document())
    }

    pub fn with_document(document: Value) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MachineState {
                model: MachineModel::new(document),
                pending: VecDeque::new(),
                commands: Vec::new(),
                open_attempts: 0,
                refuse_connections: false,
                rejected: Vec::new(),
                absolute: true,
            })),
        }
    }

    pub fn connector(&self) -> SimulatedConnector {
        SimulatedConnector {
            machine: self.clone(),
        }
    }

    /// Every code received so far, in order.
    pub async fn commands(&self) -> Vec<String> {
        self.inner.lock().await.commands.clone()
    }

    pub async fn clear_commands(&self) {
        self.inner.lock().await.commands.clear();
    }

    pub async fn document(&self) -> Value {
        self.inner.lock().await.model.document().clone()
    }

    /// Applies `patch` locally and queues it for the feed.
    pub async fn push_patch(&self, patch: Value) {
        self.inner.lock().await.publish(patch);
    }

    /// Number of times a command channel was requested from the connector.
    pub async fn open_attempts(&self) -> u32 {
        self.inner.lock().await.open_attempts
    }

    pub async fn refuse_connections(&self, refuse: bool) {
        self.inner.lock().await.refuse_connections = refuse;
    }

    /// Makes codes starting with `prefix` fail with a firmware error reply.
    pub async fn reject(&self, prefix: impl Into<String>) {
        self.inner.lock().await.rejected.push(prefix.into());
    }

    /// Runs `code` and returns the firmware's reply text.
    pub(crate) async fn execute(&self, code: &str) -> String {
        let mut state = self.inner.lock().await;
        state.commands.push(code.to_string());
        if state.rejected.iter().any(|prefix| code.starts_with(prefix.as_str())) {
            return format!("Error: {code}: rejected by the simulated machine\n");
        }
        if let Some(patch) = state.interpret(code) {
            debug!(code, %patch, "simulated: code produced patch");
            state.publish(patch);
        }
        String::new()
    }
}

impl MachineState {
    fn publish(&mut self, patch: Value) {
        self.model.apply_patch(&patch);
        self.pending.push_back(patch);
    }

    fn interpret(&mut self, code: &str) -> Option<Value> {
        let mut words = code.split_whitespace();
        let command = words.next()?.to_ascii_uppercase();
        let words: Vec<&str> = words.collect();
        match command.as_str() {
            "G28" => {
                let axes = parse_axes(&words);
                let axes = if axes.is_empty() { Axis::ALL.to_vec() } else { axes };
                Some(axes_patch(axes.into_iter().map(|axis| {
                    (axis, json!({"homed": true, "machinePosition": 0.0}))
                })))
            }
            "G92" => {
                let words = parse_words(&words);
                Some(axes_patch(words.into_iter().map(|(axis, value)| {
                    (axis, json!({"machinePosition": value}))
                })))
            }
            "G90" => {
                self.absolute = true;
                None
            }
            "G91" => {
                self.absolute = false;
                None
            }
            "G0" | "G1" => {
                let offset = self
                    .model
                    .current_tool()
                    .filter(|tool| *tool != NO_TOOL)
                    .and_then(|tool| usize::try_from(tool).ok())
                    .and_then(|tool| self.model.tool_offsets().get(tool).copied())
                    .unwrap_or_default();
                let moves = parse_words(&words)
                    .into_iter()
                    .map(|(axis, value)| {
                        let current = self.model.machine_position(axis).unwrap_or(0.0);
                        let target = if self.absolute {
                            match axis {
                                Axis::X => value - offset.x,
                                Axis::Y => value - offset.y,
                                Axis::Z => value - offset.z,
                                Axis::U => value,
                            }
                        } else {
                            current + value
                        };
                        (axis, json!({"machinePosition": target}))
                    })
                    .collect::<Vec<_>>();
                Some(axes_patch(moves))
            }
            "M999" => Some(json!({
                "state": {"status": "idle"},
                "move": {"axes": Axis::ALL.map(|_| json!({"homed": false}))},
            })),
            tool if tool.starts_with('T') && tool.len() > 1 => {
                let index = tool[1..].parse::<i32>().ok()?;
                Some(json!({"state": {"currentTool": index}}))
            }
            _ => None,
        }
    }
}

/// Patch touching only the given axes; untouched axes get an empty record so
/// the sequence keeps its length and merges element-wise.
fn axes_patch(updates: impl IntoIterator<Item = (Axis, Value)>) -> Value {
    let mut axes = vec![Value::Object(Map::new()); Axis::ALL.len()];
    for (axis, update) in updates {
        axes[axis.index()] = update;
    }
    json!({"move": {"axes": axes}})
}

fn parse_axes(words: &[&str]) -> Vec<Axis> {
    words
        .iter()
        .filter_map(|word| word.chars().next())
        .filter_map(Axis::from_letter)
        .collect()
}

fn parse_words(words: &[&str]) -> Vec<(Axis, f64)> {
    words
        .iter()
        .filter_map(|word| {
            let mut chars = word.chars();
            let axis = Axis::from_letter(chars.next()?)?;
            let value = chars.as_str().parse::<f64>().ok()?;
            Some((axis, value))
        })
        .collect()
}

/// Object model of an idle, unhomed four axis toolchanger with two tools.
pub fn default_document() -> Value {
    json!({
        "state": {"status": "idle", "currentTool": NO_TOOL},
        "move": {
            "axes": [
                {"letter": "X", "homed": false, "machinePosition": 0.0, "min": 0.0, "max": 300.0},
                {"letter": "Y", "homed": false, "machinePosition": 0.0, "min": 0.0, "max": 300.0},
                {"letter": "Z", "homed": false, "machinePosition": 0.0, "min": 0.0, "max": 400.0},
                {"letter": "U", "homed": false, "machinePosition": 0.0, "min": 0.0, "max": 200.0},
            ]
        },
        "tools": [
            {"number": 0, "offsets": [0.0, 0.0, -50.0]},
            {"number": 1, "offsets": [0.0, 0.0, -75.0]},
        ],
    })
}

#[derive(Debug, Clone)]
pub struct SimulatedConnector {
    machine: SimulatedMachine,
}

impl SimulatedConnector {
    pub fn machine(&self) -> &SimulatedMachine {
        &self.machine
    }
}

#[async_trait]
impl TransportConnector for SimulatedConnector {
    fn deployment(&self) -> Deployment {
        Deployment::Simulated
    }

    async fn open_commands(&self) -> Result<CommandChannel> {
        let mut state = self.machine.inner.lock().await;
        state.open_attempts += 1;
        if state.refuse_connections {
            return Err(DuetError::Connection(
                "simulated machine refused the connection".into(),
            ));
        }
        info!(attempt = state.open_attempts, "simulated: command channel opened");
        Ok(CommandChannel::simulated(self.machine.clone()))
    }

    async fn open_feed(&self) -> Result<Box<dyn StateFeed>> {
        Ok(Box::new(SimulatedFeed {
            machine: self.machine.clone(),
        }))
    }
}

struct SimulatedFeed {
    machine: SimulatedMachine,
}

#[async_trait]
impl StateFeed for SimulatedFeed {
    async fn subscribe(&mut self) -> Result<Value> {
        let mut state = self.machine.inner.lock().await;
        state.pending.clear();
        Ok(state.model.document().clone())
    }

    async fn next_patch(&mut self) -> Result<Value> {
        let mut state = self.machine.inner.lock().await;
        Ok(state
            .pending
            .pop_front()
            .unwrap_or_else(|| Value::Object(Map::new())))
    }
}
