use super::{ClientEvent, ServerEvent};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const TERMINAL_CREATE: &str = "terminal:create";
pub const TERMINAL_CREATED: &str = "terminal:created";
pub const TERMINAL_DATA: &str = "terminal:data";
pub const TERMINAL_RESIZE: &str = "terminal:resize";
pub const TERMINAL_EXIT: &str = "terminal:exit";
pub const TERMINAL_ERROR: &str = "terminal:error";
pub const SUPERVISION_START: &str = "supervision:start";
pub const SUPERVISION_STARTED: &str = "supervision:started";
pub const SUPERVISION_STOP: &str = "supervision:stop";
pub const SUPERVISION_STOPPED: &str = "supervision:stopped";
pub const SUPERVISION_ERROR: &str = "supervision:error";
pub const SUPERVISION_SUGGESTION: &str = "supervision:suggestion";
pub const TEAM_SPAWN_REQUEST: &str = "ai-team:spawn-request";
pub const TEAM_SPAWNED: &str = "ai-team:spawned";
pub const TEAM_STOP: &str = "ai-team:stop";
pub const TEAM_STOPPED: &str = "ai-team:stopped";
pub const TEAM_ERROR: &str = "ai-team:error";
pub const THINKING_START: &str = "thinking-start";
pub const THINKING_COMPLETE: &str = "thinking-complete";

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid payload for {event}: {source}")]
    InvalidPayload {
        event: String,
        source: serde_json::Error,
    },
    #[error("unexpected event {0} in this direction")]
    UnexpectedEvent(String),
}

/// One frame on the channel: `{"event": "...", "payload": {...}}`.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    payload: Value,
}

pub fn encode_client_event(event: &ClientEvent) -> String {
    let payload = match event {
        ClientEvent::Create(p) => to_value(p),
        ClientEvent::Data(p) => to_value(p),
        ClientEvent::Resize(p) => to_value(p),
        ClientEvent::SupervisionStart(p) => to_value(p),
        ClientEvent::SupervisionStop(p) => to_value(p),
        ClientEvent::TeamSpawn(p) => to_value(p),
        ClientEvent::TeamStop(p) => to_value(p),
    };
    encode_envelope(event.name(), payload)
}

pub fn decode_client_event(text: &str) -> Result<ClientEvent, WireError> {
    let Envelope { event, payload } = serde_json::from_str(text)?;
    let decoded = match event.as_str() {
        TERMINAL_CREATE => ClientEvent::Create(payload_as(&event, payload)?),
        TERMINAL_DATA => ClientEvent::Data(payload_as(&event, payload)?),
        TERMINAL_RESIZE => ClientEvent::Resize(payload_as(&event, payload)?),
        SUPERVISION_START => ClientEvent::SupervisionStart(payload_as(&event, payload)?),
        SUPERVISION_STOP => ClientEvent::SupervisionStop(payload_as(&event, payload)?),
        TEAM_SPAWN_REQUEST => ClientEvent::TeamSpawn(payload_as(&event, payload)?),
        TEAM_STOP => ClientEvent::TeamStop(payload_as(&event, payload)?),
        _ => return Err(WireError::UnexpectedEvent(event)),
    };
    Ok(decoded)
}

pub fn encode_server_event(event: &ServerEvent) -> Result<String, WireError> {
    let (name, payload) = match event {
        ServerEvent::Created(p) => (TERMINAL_CREATED, to_value(p)),
        ServerEvent::Data(p) => (TERMINAL_DATA, to_value(p)),
        ServerEvent::Exit(p) => (TERMINAL_EXIT, to_value(p)),
        ServerEvent::Error(p) => (TERMINAL_ERROR, to_value(p)),
        ServerEvent::SupervisionStarted(p) => (SUPERVISION_STARTED, to_value(p)),
        ServerEvent::SupervisionStopped(p) => (SUPERVISION_STOPPED, to_value(p)),
        ServerEvent::SupervisionError(p) => (SUPERVISION_ERROR, to_value(p)),
        ServerEvent::SupervisionSuggestion(p) => (SUPERVISION_SUGGESTION, to_value(p)),
        ServerEvent::TeamSpawned(p) => (TEAM_SPAWNED, to_value(p)),
        ServerEvent::TeamStopped(p) => (TEAM_STOPPED, to_value(p)),
        ServerEvent::TeamError(p) => (TEAM_ERROR, to_value(p)),
        ServerEvent::ThinkingStart(p) => (THINKING_START, to_value(p)),
        ServerEvent::ThinkingComplete(p) => (THINKING_COMPLETE, to_value(p)),
        ServerEvent::Unknown { event } => return Err(WireError::UnexpectedEvent(event.clone())),
    };
    Ok(encode_envelope(name, payload))
}

/// Unknown event names decode to [`ServerEvent::Unknown`]; a known name with
/// a bad payload is an error.
pub fn decode_server_event(text: &str) -> Result<ServerEvent, WireError> {
    let Envelope { event, payload } = serde_json::from_str(text)?;
    let decoded = match event.as_str() {
        TERMINAL_CREATED => ServerEvent::Created(payload_as(&event, payload)?),
        TERMINAL_DATA => ServerEvent::Data(payload_as(&event, payload)?),
        TERMINAL_EXIT => ServerEvent::Exit(payload_as(&event, payload)?),
        TERMINAL_ERROR => ServerEvent::Error(payload_as(&event, payload)?),
        SUPERVISION_STARTED => ServerEvent::SupervisionStarted(payload_or_default(&event, payload)?),
        SUPERVISION_STOPPED => ServerEvent::SupervisionStopped(payload_or_default(&event, payload)?),
        SUPERVISION_ERROR => ServerEvent::SupervisionError(payload_as(&event, payload)?),
        SUPERVISION_SUGGESTION => ServerEvent::SupervisionSuggestion(payload_as(&event, payload)?),
        TEAM_SPAWNED => ServerEvent::TeamSpawned(payload_as(&event, payload)?),
        TEAM_STOPPED => ServerEvent::TeamStopped(payload_or_default(&event, payload)?),
        TEAM_ERROR => ServerEvent::TeamError(payload_as(&event, payload)?),
        THINKING_START => ServerEvent::ThinkingStart(payload_as(&event, payload)?),
        THINKING_COMPLETE => ServerEvent::ThinkingComplete(payload_as(&event, payload)?),
        _ => ServerEvent::Unknown { event },
    };
    Ok(decoded)
}

fn encode_envelope(event: &str, payload: Value) -> String {
    let envelope = Envelope {
        event: event.to_string(),
        payload,
    };
    // Envelope holds only strings and JSON values; serialization cannot fail.
    serde_json::to_string(&envelope).unwrap_or_default()
}

fn to_value<T: Serialize>(payload: &T) -> Value {
    serde_json::to_value(payload).unwrap_or(Value::Null)
}

fn payload_as<T: DeserializeOwned>(event: &str, payload: Value) -> Result<T, WireError> {
    serde_json::from_value(payload).map_err(|source| WireError::InvalidPayload {
        event: event.to_string(),
        source,
    })
}

fn payload_or_default<T: DeserializeOwned + Default>(
    event: &str,
    payload: Value,
) -> Result<T, WireError> {
    if payload.is_null() {
        return Ok(T::default());
    }
    payload_as(event, payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CreateTerminal, TerminalData, TerminalExit};
    use serde_json::json;

    #[test]
    fn client_create_uses_event_envelope() {
        let frame = encode_client_event(&ClientEvent::Create(CreateTerminal {
            id: "abc".into(),
            cols: 80,
            rows: 24,
        }));
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(
            value,
            json!({"event": "terminal:create", "payload": {"id": "abc", "cols": 80, "rows": 24}})
        );
    }

    #[test]
    fn exit_payload_uses_camel_case() {
        let frame = r#"{"event":"terminal:exit","payload":{"id":"abc","exitCode":130}}"#;
        let event = decode_server_event(frame).unwrap();
        assert_eq!(
            event,
            ServerEvent::Exit(TerminalExit {
                id: "abc".into(),
                exit_code: Some(130),
            })
        );
    }

    #[test]
    fn unknown_server_event_is_not_an_error() {
        let frame = r#"{"event":"agent:telemetry","payload":{"cpu":3}}"#;
        assert_eq!(
            decode_server_event(frame).unwrap(),
            ServerEvent::Unknown {
                event: "agent:telemetry".into()
            }
        );
    }

    #[test]
    fn empty_confirmation_payloads_decode() {
        let frame = r#"{"event":"supervision:started"}"#;
        assert!(matches!(
            decode_server_event(frame).unwrap(),
            ServerEvent::SupervisionStarted(_)
        ));
    }

    #[test]
    fn bad_payload_for_known_event_is_rejected() {
        let frame = r#"{"event":"terminal:data","payload":{"id":7}}"#;
        assert!(matches!(
            decode_server_event(frame),
            Err(WireError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn keystroke_frames_keep_raw_control_bytes() {
        let event = ClientEvent::Data(TerminalData {
            id: "s".into(),
            data: "\u{7f}\r".into(),
        });
        let decoded = decode_client_event(&encode_client_event(&event)).unwrap();
        assert_eq!(decoded, event);
    }
}
