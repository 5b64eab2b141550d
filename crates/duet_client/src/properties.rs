use serde_json::Value;
use shared::{domain::NO_TOOL, protocol::ObjectModelReply};

use crate::{
    command::CommandChannel,
    error::{DuetError, Result},
    model::{parse_axis_limits, parse_tool_offsets, AxisLimits, MachineModel, ToolOffset},
};

pub const TOOL_QUERY: &str = "T";
pub const TOOLS_QUERY: &str = "M409 K\"tools\"";
pub const AXES_QUERY: &str = "M409 K\"move.axes\"";

/// Read-only machine properties cached for the lifetime of a connection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MachineProperties {
    pub active_tool: Option<i32>,
    pub tool_offsets: Option<Vec<ToolOffset>>,
    pub axis_limits: Option<Vec<AxisLimits>>,
}

impl MachineProperties {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Fills every missing property from a model snapshot.
    pub fn fill_from_model(&mut self, model: &MachineModel) {
        if self.active_tool.is_none() {
            self.active_tool = model.current_tool();
        }
        if self.tool_offsets.is_none() {
            self.tool_offsets = Some(model.tool_offsets());
        }
        if self.axis_limits.is_none() {
            self.axis_limits = Some(model.axis_limits());
        }
    }

    /// Queries every property from the firmware.
    pub async fn query(channel: &CommandChannel) -> Result<Self> {
        let active_tool = parse_tool_reply(&channel.send(TOOL_QUERY).await?)?;
        let tools = query_object_model(channel, TOOLS_QUERY).await?;
        let axes = query_object_model(channel, AXES_QUERY).await?;
        Ok(Self {
            active_tool: Some(active_tool),
            tool_offsets: Some(parse_tool_offsets(&tools)),
            axis_limits: Some(parse_axis_limits(&axes)),
        })
    }
}

/// Reads the selected tool from a `T` reply.
///
/// The socket API answers with a bare index, the HTTP API with
/// `Tool N is selected.` or `No tool is selected.`
pub fn parse_tool_reply(reply: &str) -> Result<i32> {
    let trimmed = reply.trim();
    let unexpected = || DuetError::UnexpectedReply {
        command: TOOL_QUERY.into(),
        reply: trimmed.to_string(),
    };
    if trimmed.starts_with("No tool") {
        return Ok(NO_TOOL);
    }
    if let Some(rest) = trimmed.strip_prefix("Tool") {
        return rest
            .split_whitespace()
            .next()
            .and_then(|index| index.parse().ok())
            .ok_or_else(unexpected);
    }
    trimmed.parse().map_err(|_| unexpected())
}

async fn query_object_model(channel: &CommandChannel, code: &str) -> Result<Value> {
    let reply = channel.send(code).await?;
    let reply: ObjectModelReply =
        serde_json::from_str(reply.trim()).map_err(|err| DuetError::UnexpectedReply {
            command: code.to_string(),
            reply: format!("{err}: {}", reply.trim()),
        })?;
    Ok(reply.result)
}
