//! Wire envelopes shared by the WebSocket and SSE transports.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WsError;
use crate::utils::now_ms;

/// Inbound `type` value for heartbeat replies.
pub const PONG: &str = "pong";

/// Inbound envelope: `{type, channel, data, timestamp}`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InboundMessage {
    /// Discriminator ("data", "pong", ...).
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Topic the payload belongs to. Absent on heartbeat replies.
    #[serde(default)]
    pub channel: String,
    /// Opaque payload, forwarded verbatim to listeners.
    #[serde(default)]
    pub data: Value,
    /// Server timestamp in milliseconds.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl InboundMessage {
    /// Whether this is a heartbeat reply that carries no data.
    pub fn is_pong(&self) -> bool {
        self.msg_type == PONG
    }
}

/// Decode one inbound text frame.
pub fn decode_inbound(text: &str) -> Result<InboundMessage, WsError> {
    serde_json::from_str(text).map_err(|e| WsError::ParseError(e.to_string()))
}

/// Outbound control frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    /// Start receiving a topic.
    Subscribe {
        /// Topic.
        channel: String,
        /// Client timestamp in milliseconds.
        timestamp: i64,
    },
    /// Stop receiving a topic.
    Unsubscribe {
        /// Topic.
        channel: String,
        /// Client timestamp in milliseconds.
        timestamp: i64,
    },
    /// Heartbeat.
    Ping,
}

impl ControlMessage {
    /// Subscribe or unsubscribe frame for `topic`, stamped now.
    pub fn for_topic(topic: &str, subscribing: bool) -> Self {
        let channel = topic.to_string();
        let timestamp = now_ms();
        if subscribing {
            Self::Subscribe { channel, timestamp }
        } else {
            Self::Unsubscribe { channel, timestamp }
        }
    }

    /// Label used for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::Ping => "ping",
        }
    }

    /// Serialize to the JSON text frame.
    pub fn to_text(&self) -> Result<String, WsError> {
        serde_json::to_string(self).map_err(|e| WsError::SendFailed(e.to_string()))
    }
}
