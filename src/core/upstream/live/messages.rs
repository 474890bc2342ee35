//! Live streaming protocol message types.
//!
//! Client messages are single-key JSON objects:
//! - `setup` - session configuration, sent once after connecting
//! - `realtimeInput` - base64 PCM media chunks
//! - `clientContent` - text turns
//! - `toolResponse` - function call results
//!
//! Server messages carry one or more of:
//! - `setupComplete` - setup acknowledged
//! - `serverContent` - model audio/text parts, transcriptions, `turnComplete`, `interrupted`
//! - `toolCall` - function calls requested by the model
//! - `goAway` - server is about to disconnect
//! - `error` - protocol error

use base64::prelude::*;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::upstream::base::{
    ToolCall, ToolDeclaration, ToolResult, TranscriptRole, UpstreamEvent,
};

// =============================================================================
// Client Messages
// =============================================================================

/// Messages sent to the upstream.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(SetupPayload),
    RealtimeInput(RealtimeInput),
    ClientContent(ClientContent),
    ToolResponse(ToolResponse),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupPayload {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSet>,
    pub input_audio_transcription: Map<String, Value>,
    pub output_audio_transcription: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSet {
    pub function_declarations: Vec<ToolDeclaration>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: Value,
}

// =============================================================================
// Shared content types
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

impl Blob {
    /// Sample rate from an `audio/pcm;rate=N` mime type.
    pub fn sample_rate(&self) -> Option<u32> {
        self.mime_type
            .split(';')
            .find_map(|param| param.trim().strip_prefix("rate="))
            .and_then(|rate| rate.parse().ok())
    }
}

impl ClientMessage {
    /// Base64-encode a PCM16 frame as a realtime media chunk.
    pub fn audio(frame: &[u8], sample_rate: u32) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![Blob {
                mime_type: format!("audio/pcm;rate={sample_rate}"),
                data: BASE64_STANDARD.encode(frame),
            }],
        })
    }

    /// A complete user text turn.
    pub fn text(text: &str) -> Self {
        ClientMessage::ClientContent(ClientContent {
            turns: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(text.to_string()),
                    inline_data: None,
                }],
            }],
            turn_complete: true,
        })
    }

    pub fn tool_result(result: &ToolResult) -> Self {
        ClientMessage::ToolResponse(ToolResponse {
            function_responses: vec![FunctionResponse {
                id: result.call_id.clone(),
                name: result.name.clone(),
                response: result.response_value(),
            }],
        })
    }
}

// =============================================================================
// Server Messages
// =============================================================================

/// Messages received from the upstream. Several sections may be present at once.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub tool_call: Option<ToolCallMessage>,
    #[serde(default)]
    pub go_away: Option<Value>,
    #[serde(default)]
    pub error: Option<ServerError>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallMessage {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerError {
    #[serde(default)]
    pub message: Option<String>,
}

impl ServerMessage {
    /// Parse one upstream frame.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Sample rates declared by the audio parts of the model turn.
    pub fn audio_sample_rates(&self) -> Vec<u32> {
        self.server_content
            .iter()
            .filter_map(|content| content.model_turn.as_ref())
            .flat_map(|turn| &turn.parts)
            .filter_map(|part| part.inline_data.as_ref()?.sample_rate())
            .collect()
    }

    /// Flatten the message into relay events, in delivery order.
    pub fn into_events(self) -> Vec<UpstreamEvent> {
        let mut events = Vec::new();

        if self.setup_complete.is_some() {
            events.push(UpstreamEvent::HandshakeAck);
        }

        if let Some(content) = self.server_content {
            if content.interrupted {
                events.push(UpstreamEvent::Interrupted);
            }
            if let Some(t) = content.input_transcription
                && !t.text.is_empty()
            {
                events.push(UpstreamEvent::Transcript {
                    role: TranscriptRole::User,
                    text: t.text,
                });
            }
            if let Some(turn) = content.model_turn {
                for part in turn.parts {
                    if let Some(blob) = part.inline_data {
                        match BASE64_STANDARD.decode(blob.data.as_bytes()) {
                            Ok(pcm) => events.push(UpstreamEvent::AudioChunk(Bytes::from(pcm))),
                            Err(e) => {
                                tracing::warn!(mime_type = %blob.mime_type, "Dropping undecodable audio part: {}", e)
                            }
                        }
                    }
                    if let Some(text) = part.text
                        && !text.is_empty()
                    {
                        events.push(UpstreamEvent::Transcript {
                            role: TranscriptRole::Assistant,
                            text,
                        });
                    }
                }
            }
            if let Some(t) = content.output_transcription
                && !t.text.is_empty()
            {
                events.push(UpstreamEvent::Transcript {
                    role: TranscriptRole::Assistant,
                    text: t.text,
                });
            }
            if content.turn_complete {
                events.push(UpstreamEvent::TurnComplete);
            }
        }

        if let Some(tool_call) = self.tool_call {
            for call in tool_call.function_calls {
                let call_id = call
                    .id
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                events.push(UpstreamEvent::ToolCallRequest(ToolCall {
                    name: call.name,
                    call_id,
                    args: call.args.unwrap_or_default(),
                }));
            }
        }

        if self.go_away.is_some() {
            tracing::warn!("Upstream announced it is going away");
        }

        if let Some(error) = self.error {
            events.push(UpstreamEvent::Error {
                message: error
                    .message
                    .unwrap_or_else(|| "Unknown upstream error".to_string()),
            });
        }

        events
    }
}
