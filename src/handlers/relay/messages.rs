//! Relay WebSocket message types
//!
//! Text frames carry JSON control messages discriminated by `type`; binary
//! frames carry raw PCM16 audio and never pass through these types.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::core::upstream::TranscriptRole;
use crate::errors::RelayError;

/// Maximum allowed size for a `text` message (50 KB)
pub const MAX_TEXT_SIZE: usize = 50 * 1024;

// =============================================================================
// Incoming Messages (Client -> Server)
// =============================================================================

/// Incoming control messages from the client.
#[derive(Debug)]
pub enum IncomingMessage {
    Register(RegisterRequest),
    StartCall(StartCallRequest),
    Hangup,
    Ping,
    PeerSignal(PeerSignalRequest),
    Text(TextRequest),
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(rename = "clientId")]
    pub client_id: String,
}

#[derive(Debug, Deserialize)]
pub struct StartCallRequest {
    #[serde(rename = "clientId")]
    pub client_id: String,
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<String>,
}

/// Peer signal as sent by the client. The payload is kept as raw JSON text
/// so it is relayed without being re-encoded.
#[derive(Debug, Deserialize)]
pub struct PeerSignalRequest {
    #[serde(rename = "targetClientId")]
    pub target_client_id: String,
    pub payload: Box<RawValue>,
}

#[derive(Debug, Deserialize)]
pub struct TextRequest {
    pub text: String,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: Option<String>,
}

impl IncomingMessage {
    /// Parse one text frame.
    ///
    /// Returns `Ok(None)` for a well-formed message of an unknown type, which
    /// callers ignore. Invalid JSON, a missing `type` or bad fields for a
    /// known type are `MalformedMessage`.
    pub fn parse(text: &str) -> Result<Option<Self>, RelayError> {
        let envelope: Envelope = serde_json::from_str(text)
            .map_err(|e| RelayError::MalformedMessage(format!("Invalid JSON: {e}")))?;
        let Some(kind) = envelope.kind else {
            return Err(RelayError::MalformedMessage(
                "Missing message type".to_string(),
            ));
        };

        let message = match kind.as_str() {
            "register" => Self::Register(fields(&kind, text)?),
            "start_call" => Self::StartCall(fields(&kind, text)?),
            "hangup" => Self::Hangup,
            "ping" => Self::Ping,
            "peer_signal" => Self::PeerSignal(fields(&kind, text)?),
            "text" => {
                let request: TextRequest = fields(&kind, text)?;
                if request.text.len() > MAX_TEXT_SIZE {
                    return Err(RelayError::MalformedMessage(format!(
                        "Text too large: {} bytes (max {MAX_TEXT_SIZE})",
                        request.text.len()
                    )));
                }
                Self::Text(request)
            }
            _ => return Ok(None),
        };
        Ok(Some(message))
    }

    /// Message type name, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Register(_) => "register",
            Self::StartCall(_) => "start_call",
            Self::Hangup => "hangup",
            Self::Ping => "ping",
            Self::PeerSignal(_) => "peer_signal",
            Self::Text(_) => "text",
        }
    }
}

fn fields<'a, T: Deserialize<'a>>(kind: &str, text: &'a str) -> Result<T, RelayError> {
    serde_json::from_str(text)
        .map_err(|e| RelayError::MalformedMessage(format!("Invalid {kind} message: {e}")))
}

// =============================================================================
// Outgoing Messages (Server -> Client)
// =============================================================================

/// Outgoing control messages to the client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutgoingMessage {
    Registered {
        success: bool,
    },

    SessionCreated {
        #[serde(rename = "sessionId")]
        session_id: String,
        success: bool,
    },

    Pong,

    /// Relayed peer signal, tagged with the sender
    PeerSignal {
        #[serde(rename = "senderClientId")]
        sender_client_id: String,
        payload: Box<RawValue>,
    },

    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    /// Upstream detected barge-in; drop anything queued for playback
    ClearBuffer,

    Transcript {
        role: TranscriptRole,
        text: String,
    },

    TurnComplete,
}

impl OutgoingMessage {
    pub fn error(message: impl Into<String>, code: Option<&str>) -> Self {
        Self::Error {
            message: message.into(),
            code: code.map(str::to_string),
        }
    }
}

impl From<&RelayError> for OutgoingMessage {
    fn from(error: &RelayError) -> Self {
        Self::error(error.to_string(), Some(error.code()))
    }
}

/// Work item for the per-connection sender task.
#[derive(Debug)]
pub enum ClientRoute {
    Outgoing(OutgoingMessage),
    Audio(Bytes),
    Ping,
    Close,
}

impl ClientRoute {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientRoute::Outgoing(_) => "control",
            ClientRoute::Audio(_) => "audio",
            ClientRoute::Ping => "ping",
            ClientRoute::Close => "close",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn to_value(message: &OutgoingMessage) -> Value {
        serde_json::to_value(message).unwrap()
    }

    #[test]
    fn test_parse_register() {
        let msg = IncomingMessage::parse(r#"{"type":"register","clientId":"c1"}"#)
            .unwrap()
            .unwrap();
        assert!(matches!(msg, IncomingMessage::Register(r) if r.client_id == "c1"));
    }

    #[test]
    fn test_parse_start_call_with_and_without_session_id() {
        let msg = IncomingMessage::parse(r#"{"type":"start_call","clientId":"c1"}"#)
            .unwrap()
            .unwrap();
        assert!(matches!(msg, IncomingMessage::StartCall(ref r) if r.session_id.is_none()));

        let msg =
            IncomingMessage::parse(r#"{"type":"start_call","clientId":"c1","sessionId":"s1"}"#)
                .unwrap()
                .unwrap();
        assert!(
            matches!(msg, IncomingMessage::StartCall(ref r) if r.session_id.as_deref() == Some("s1"))
        );
    }

    #[test]
    fn test_parse_unit_messages() {
        assert!(matches!(
            IncomingMessage::parse(r#"{"type":"hangup"}"#).unwrap(),
            Some(IncomingMessage::Hangup)
        ));
        assert!(matches!(
            IncomingMessage::parse(r#"{"type":"ping","extra":1}"#).unwrap(),
            Some(IncomingMessage::Ping)
        ));
    }

    #[test]
    fn test_unknown_type_is_ignored() {
        assert!(
            IncomingMessage::parse(r#"{"type":"subscribe","topic":"x"}"#)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_malformed_messages() {
        for text in [
            "not json",
            r#"{"clientId":"c1"}"#,
            r#"{"type":"register"}"#,
            r#"{"type":"register","clientId":7}"#,
            r#"{"type":"peer_signal","payload":{}}"#,
        ] {
            let err = IncomingMessage::parse(text).unwrap_err();
            assert_eq!(err.code(), "malformed_message", "input: {text}");
        }
    }

    #[test]
    fn test_oversized_text_is_malformed() {
        let big = "a".repeat(MAX_TEXT_SIZE + 1);
        let text = json!({"type": "text", "text": big}).to_string();
        assert!(IncomingMessage::parse(&text).is_err());
    }

    #[test]
    fn test_peer_signal_payload_relayed_verbatim() {
        let raw = r#"{"type":"peer_signal","targetClientId":"B","payload":{"sdp":"v=0\r\n","z":1.50,"a":[3,2,1]}}"#;
        let Some(IncomingMessage::PeerSignal(request)) = IncomingMessage::parse(raw).unwrap()
        else {
            panic!("expected peer_signal");
        };
        assert_eq!(request.target_client_id, "B");

        let original_payload = request.payload.get().to_string();
        let out = OutgoingMessage::PeerSignal {
            sender_client_id: "A".to_string(),
            payload: request.payload,
        };
        let json = serde_json::to_string(&out).unwrap();
        assert!(json.contains(r#""senderClientId":"A""#));
        assert!(json.contains(&format!(r#""payload":{original_payload}"#)));
    }

    #[test]
    fn test_outgoing_wire_format() {
        assert_eq!(
            to_value(&OutgoingMessage::Registered { success: true }),
            json!({"type": "registered", "success": true})
        );
        assert_eq!(
            to_value(&OutgoingMessage::SessionCreated {
                session_id: "s1".to_string(),
                success: true
            }),
            json!({"type": "session_created", "sessionId": "s1", "success": true})
        );
        assert_eq!(to_value(&OutgoingMessage::Pong), json!({"type": "pong"}));
        assert_eq!(
            to_value(&OutgoingMessage::ClearBuffer),
            json!({"type": "clear_buffer"})
        );
        assert_eq!(
            to_value(&OutgoingMessage::TurnComplete),
            json!({"type": "turn_complete"})
        );
        assert_eq!(
            to_value(&OutgoingMessage::Transcript {
                role: TranscriptRole::User,
                text: "hi".to_string()
            }),
            json!({"type": "transcript", "role": "user", "text": "hi"})
        );
        assert_eq!(
            to_value(&OutgoingMessage::error("boom", None)),
            json!({"type": "error", "message": "boom"})
        );
    }

    #[test]
    fn test_error_from_relay_error_carries_code() {
        let message = OutgoingMessage::from(&RelayError::not_registered());
        let value = to_value(&message);
        assert_eq!(value["type"], "error");
        assert_eq!(value["code"], "not_registered");
    }
}
