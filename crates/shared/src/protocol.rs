use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Control server API version spoken by this client.
pub const PROTOCOL_VERSION: u32 = 8;

/// Substring the firmware embeds in replies to codes that failed.
pub const ERROR_MARKER: &str = "Error";

/// WebSocket feed acknowledgement requesting the next patch.
pub const WS_ACKNOWLEDGE: &str = "OK\n";
pub const WS_PING: &str = "PING\n";
pub const WS_PONG: &str = "PONG\n";

/// First frame the control server sends on every new socket connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInitMessage {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionMode {
    Patch,
    Full,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ClientInitMessage {
    Command {
        version: u32,
    },
    Subscribe {
        version: u32,
        #[serde(rename = "subscriptionMode")]
        subscription_mode: SubscriptionMode,
    },
}

impl ClientInitMessage {
    pub fn command() -> Self {
        Self::Command {
            version: PROTOCOL_VERSION,
        }
    }

    pub fn subscribe(subscription_mode: SubscriptionMode) -> Self {
        Self::Subscribe {
            version: PROTOCOL_VERSION,
            subscription_mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleCodeRequest {
    pub code: String,
    pub channel: u8,
    pub command: String,
}

impl SimpleCodeRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            channel: 0,
            command: "SimpleCode".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum FeedCommand {
    Acknowledge,
}

/// Generic control server reply to handshakes and command envelopes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl BaseResponse {
    /// Reply text as the firmware would print it.
    pub fn into_text(self) -> String {
        if let Some(message) = self.error_message {
            let kind = self.error_type.unwrap_or_else(|| "Error".into());
            return format!("{kind}: {message}");
        }
        match self.result {
            Some(Value::String(text)) => text,
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }
}

/// Reply body of an `M409` object model query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectModelReply {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub flags: String,
    pub result: Value,
}
