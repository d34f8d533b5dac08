//! Wire protocol between browser clients and the gateway.
//!
//! Frames are one JSON object per WebSocket text message, tagged by `type`,
//! the same discriminated-union shape used for the event enums elsewhere in
//! this codebase (`WsEvent`, `StreamWebSocketMessage`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frames a client may send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    Message {
        chat_id: String,
        content: String,
        #[serde(default)]
        model: Option<String>,
        #[serde(default)]
        meta_info: Option<String>,
        #[serde(default)]
        enabled_tools: Option<Value>,
    },
    Subscribe {
        #[serde(default)]
        chat_id: Option<String>,
        #[serde(default)]
        stream_id: Option<String>,
    },
    Stop {
        #[serde(default)]
        chat_id: Option<String>,
        #[serde(default)]
        stream_id: Option<String>,
    },
    Ping,
    McpToolResult {
        request_id: String,
        #[serde(default)]
        result: Value,
        #[serde(flatten)]
        extra: Value,
    },
}

/// Frames the gateway may send.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    Message {
        id: String,
        role: &'static str,
        content: String,
        created_at: String,
        chat_id: String,
    },
    MessageStart {
        role: &'static str,
        stream_id: String,
        chat_id: String,
    },
    MessageChunk {
        content: String,
        stream_id: String,
        chat_id: String,
    },
    MetaInfoUpdate {
        content: String,
        stream_id: String,
        chat_id: String,
    },
    MessageComplete {
        stream_id: String,
        chat_id: String,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stream_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        chat_id: Option<String>,
    },
    SubscriptionConfirmed {
        stream_id: String,
        chat_id: String,
    },
    NoActiveStream {
        chat_id: String,
    },
    Pong,
}
