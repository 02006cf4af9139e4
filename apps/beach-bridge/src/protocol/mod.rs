pub mod wire;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use wire::{
    WireError, decode_client_event, decode_server_event, encode_client_event, encode_server_event,
};

/// Events the bridge sends over the duplex channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Create(CreateTerminal),
    Data(TerminalData),
    Resize(ResizeTerminal),
    SupervisionStart(SupervisionStart),
    SupervisionStop(SupervisionStop),
    TeamSpawn(TeamSpawnRequest),
    TeamStop(TeamStop),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Create(_) => wire::TERMINAL_CREATE,
            ClientEvent::Data(_) => wire::TERMINAL_DATA,
            ClientEvent::Resize(_) => wire::TERMINAL_RESIZE,
            ClientEvent::SupervisionStart(_) => wire::SUPERVISION_START,
            ClientEvent::SupervisionStop(_) => wire::SUPERVISION_STOP,
            ClientEvent::TeamSpawn(_) => wire::TEAM_SPAWN_REQUEST,
            ClientEvent::TeamStop(_) => wire::TEAM_STOP,
        }
    }
}

/// Events the remote side pushes to the bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Created(TerminalCreated),
    Data(TerminalData),
    Exit(TerminalExit),
    Error(TerminalError),
    SupervisionStarted(SupervisionStarted),
    SupervisionStopped(SupervisionStopped),
    SupervisionError(ModeFailure),
    SupervisionSuggestion(SupervisionSuggestion),
    TeamSpawned(TeamSpawned),
    TeamStopped(TeamStopped),
    TeamError(ModeFailure),
    ThinkingStart(ThinkingStart),
    ThinkingComplete(ThinkingComplete),
    /// An event name this build does not know. Logged and ignored.
    Unknown { event: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTerminal {
    pub id: String,
    pub cols: u16,
    pub rows: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalData {
    pub id: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeTerminal {
    pub id: String,
    pub cols: u16,
    pub rows: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalCreated {
    pub id: String,
    pub pid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalExit {
    pub id: String,
    #[serde(default)]
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisionStart {
    pub session_id: String,
    pub terminal_id: String,
    pub mode: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisionStop {
    pub session_id: String,
    pub terminal_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisionStarted {
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisionStopped {
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisionSuggestion {
    pub suggestion: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

/// Shared payload of `supervision:error` and `ai-team:error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeFailure {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamSpawnRequest {
    pub requirement: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingAnnotation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamStop {
    pub team_id: String,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamSpawned {
    pub team_id: String,
    pub agent_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamStopped {
    #[serde(default)]
    pub team_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThinkingStart {
    pub mode: String,
    #[serde(default)]
    pub config: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThinkingComplete {
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Reasoning-depth annotation attached to outgoing command payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingAnnotation {
    pub mode: crate::client::modes::ThinkingMode,
    pub budget_tokens: u32,
}
