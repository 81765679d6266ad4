//! Wire protocol message types
//!
//! Every server-to-client message is one JSON text frame:
//!
//! ```json
//! {"type": "task_update", "payload": {...}, "sequence": 42}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message type carried in the `type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainType {
    TaskUpdate,
    ReportUpdate,
    DashboardUpdate,
    CommandUpdate,
    GameStateUpdate,
    InitialState,
    WsError,
}

impl DomainType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskUpdate => "task_update",
            Self::ReportUpdate => "report_update",
            Self::DashboardUpdate => "dashboard_update",
            Self::CommandUpdate => "command_update",
            Self::GameStateUpdate => "game_state_update",
            Self::InitialState => "initial_state",
            Self::WsError => "ws_error",
        }
    }
}

impl std::fmt::Display for DomainType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A batched message with its enqueue-time sequence
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub domain_type: DomainType,
    pub payload: Value,
    pub sequence: u64,
}

impl OutboundMessage {
    /// Serialize to a text frame
    pub fn to_frame(&self) -> serde_json::Result<String> {
        WireFrame {
            domain_type: self.domain_type,
            payload: &self.payload,
            sequence: Some(self.sequence),
        }
        .encode()
    }
}

/// Serialized shape of every frame
#[derive(Debug, Serialize)]
pub struct WireFrame<'a> {
    #[serde(rename = "type")]
    pub domain_type: DomainType,
    pub payload: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
}

impl WireFrame<'_> {
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Frame carrying a client's initial snapshot, tagged with its anchor sequence
pub fn initial_state_frame(snapshot: &Value, anchor: u64) -> serde_json::Result<String> {
    WireFrame {
        domain_type: DomainType::InitialState,
        payload: snapshot,
        sequence: Some(anchor),
    }
    .encode()
}

/// Recoverable error notice sent in place of a snapshot that could not be built
pub fn snapshot_error_frame(message: &str, anchor: u64) -> serde_json::Result<String> {
    let payload = serde_json::json!({
        "message": message,
        "recoverable": true,
    });
    WireFrame {
        domain_type: DomainType::WsError,
        payload: &payload,
        sequence: Some(anchor),
    }
    .encode()
}

/// Client-to-server message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Application-level keepalive
    Ping,
}

/// Reply to [`ClientMessage::Ping`]
pub const PONG_FRAME: &str = r#"{"type":"pong"}"#;
