use serde_json::{Map, Value};
use shared::domain::{Axis, HomingState, MachineStatus};

/// Local mirror of the firmware object model.
#[derive(Debug, Clone, PartialEq)]
pub struct MachineModel {
    document: Value,
}

impl Default for MachineModel {
    fn default() -> Self {
        Self {
            document: Value::Object(Map::new()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ToolOffset {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisLimits {
    pub min: f64,
    pub max: f64,
}

impl MachineModel {
    pub fn new(document: Value) -> Self {
        Self { document }
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn into_document(self) -> Value {
        self.document
    }

    pub fn replace(&mut self, document: Value) {
        self.document = document;
    }

    pub fn apply_patch(&mut self, patch: &Value) {
        merge_patch(&mut self.document, patch);
    }

    /// Looks up a value by JSON pointer, e.g. `/state/status`.
    pub fn pointer(&self, path: &str) -> Option<&Value> {
        self.document.pointer(path)
    }

    pub fn status(&self) -> Option<MachineStatus> {
        self.pointer("/state/status")
            .and_then(|status| serde_json::from_value(status.clone()).ok())
    }

    pub fn current_tool(&self) -> Option<i32> {
        self.pointer("/state/currentTool")
            .and_then(Value::as_i64)
            .and_then(|tool| i32::try_from(tool).ok())
    }

    pub fn axes_homed(&self) -> HomingState {
        let mut state = HomingState::default();
        for axis in Axis::ALL {
            let homed = self
                .axis(axis)
                .and_then(|record| record.get("homed"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            state.set(axis, homed);
        }
        state
    }

    pub fn machine_position(&self, axis: Axis) -> Option<f64> {
        self.axis(axis)
            .and_then(|record| record.get("machinePosition"))
            .and_then(Value::as_f64)
    }

    pub fn tool_offsets(&self) -> Vec<ToolOffset> {
        self.pointer("/tools")
            .map(parse_tool_offsets)
            .unwrap_or_default()
    }

    pub fn axis_limits(&self) -> Vec<AxisLimits> {
        self.pointer("/move/axes")
            .map(parse_axis_limits)
            .unwrap_or_default()
    }

    fn axis(&self, axis: Axis) -> Option<&Value> {
        self.pointer("/move/axes")
            .and_then(Value::as_array)
            .and_then(|axes| axes.get(axis.index()))
    }
}

/// Merges `patch` into `target`.
///
/// Maps merge key by key and keep keys the patch does not mention. A sequence
/// shorter than the one it patches replaces it outright, since the firmware
/// only sends shorter sequences after removing items; otherwise sequences merge
/// element-wise and grow. Every other combination overwrites.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(current), Value::Object(incoming)) => {
            for (key, value) in incoming {
                match current.get_mut(key) {
                    Some(existing) => merge_patch(existing, value),
                    None => {
                        current.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (Value::Array(current), Value::Array(incoming)) => {
            if incoming.len() < current.len() {
                *current = incoming.clone();
                return;
            }
            for (index, value) in incoming.iter().enumerate() {
                match current.get_mut(index) {
                    Some(existing) => merge_patch(existing, value),
                    None => current.push(value.clone()),
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

/// Reads `offsets` from a `tools` array; empty tool slots report zero offset.
pub fn parse_tool_offsets(tools: &Value) -> Vec<ToolOffset> {
    let Some(tools) = tools.as_array() else {
        return Vec::new();
    };
    tools
        .iter()
        .map(|tool| {
            let offsets = tool
                .get("offsets")
                .and_then(Value::as_array)
                .map(|values| values.iter().filter_map(Value::as_f64).collect::<Vec<_>>())
                .unwrap_or_default();
            ToolOffset {
                x: offsets.first().copied().unwrap_or(0.0),
                y: offsets.get(1).copied().unwrap_or(0.0),
                z: offsets.get(2).copied().unwrap_or(0.0),
            }
        })
        .collect()
}

pub fn parse_axis_limits(axes: &Value) -> Vec<AxisLimits> {
    let Some(axes) = axes.as_array() else {
        return Vec::new();
    };
    axes.iter()
        .map(|axis| AxisLimits {
            min: axis.get("min").and_then(Value::as_f64).unwrap_or(0.0),
            max: axis.get("max").and_then(Value::as_f64).unwrap_or(0.0),
        })
        .collect()
}

#[cfg(test)]
#[path = "tests/model_tests.rs"]
mod tests;
