//! Base traits and types for upstream realtime connections.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur on an upstream connection.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Transport could not be opened
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Setup message could not be delivered or was rejected
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket transport error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Adapter has already been closed locally
    #[error("Not connected")]
    NotConnected,

    /// Remote side closed the stream
    #[error("Upstream stream closed")]
    Closed,
}

/// Result type for upstream operations.
pub type UpstreamResult<T> = Result<T, UpstreamError>;

// =============================================================================
// Events
// =============================================================================

/// Role of the speaker in a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptRole {
    /// User speech transcript
    User,
    /// Assistant speech transcript
    Assistant,
}

impl fmt::Display for TranscriptRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptRole::User => write!(f, "user"),
            TranscriptRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// A tool invocation requested by the upstream model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub call_id: String,
    pub args: Map<String, Value>,
}

/// Outcome of a single tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Success(Map<String, Value>),
    Failure(String),
}

/// Result returned to the upstream, correlated by `call_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub outcome: ToolOutcome,
}

impl ToolResult {
    pub fn success(call: &ToolCall, result: Map<String, Value>) -> Self {
        Self {
            call_id: call.call_id.clone(),
            name: call.name.clone(),
            outcome: ToolOutcome::Success(result),
        }
    }

    pub fn failure(call: &ToolCall, error: impl Into<String>) -> Self {
        Self {
            call_id: call.call_id.clone(),
            name: call.name.clone(),
            outcome: ToolOutcome::Failure(error.into()),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Failure(_))
    }

    /// `{"result": {...}}` or `{"error": "..."}`
    pub fn response_value(&self) -> Value {
        match &self.outcome {
            ToolOutcome::Success(result) => {
                serde_json::json!({ "result": Value::Object(result.clone()) })
            }
            ToolOutcome::Failure(error) => serde_json::json!({ "error": error }),
        }
    }
}

/// Tool declaration advertised to the upstream at setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

/// Events produced by [`UpstreamAdapter::read_event`].
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    /// Upstream acknowledged the setup message
    HandshakeAck,
    /// Raw PCM16 audio at the outbound sample rate
    AudioChunk(Bytes),
    /// Partial or final transcript text
    Transcript { role: TranscriptRole, text: String },
    /// Model asked for a tool to be executed
    ToolCallRequest(ToolCall),
    /// Model finished its turn
    TurnComplete,
    /// User barged in; pending output must be dropped
    Interrupted,
    /// Protocol-level error reported by the upstream
    Error { message: String },
}

/// Per-session parameters used to open an upstream connection.
#[derive(Debug, Clone, Default)]
pub struct UpstreamSetup {
    pub session_id: String,
    pub instructions: String,
    pub tools: Vec<ToolDeclaration>,
}

// =============================================================================
// Traits
// =============================================================================

/// One open connection to the upstream realtime service.
///
/// All outbound operations are serialized through a single write lock.
/// `read_event` is meant to be driven by exactly one loop.
#[async_trait]
pub trait UpstreamAdapter: Send + Sync {
    /// Forward one inbound PCM16 frame.
    async fn send_audio(&self, frame: Bytes) -> UpstreamResult<()>;

    /// Send user text or system-originated context.
    async fn send_text(&self, text: &str) -> UpstreamResult<()>;

    /// Return a tool result keyed by its call ID.
    async fn send_tool_result(&self, result: ToolResult) -> UpstreamResult<()>;

    /// Wait for the next event.
    ///
    /// Unparseable messages are skipped; a transport failure is returned as `Err`.
    async fn read_event(&self) -> UpstreamResult<UpstreamEvent>;

    /// Close the transport. Safe to call more than once.
    async fn close(&self) -> UpstreamResult<()>;

    fn is_open(&self) -> bool;
}

/// Opens upstream connections for new sessions.
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    /// Open a connection and send the session setup.
    ///
    /// On failure any partially opened transport is closed before returning.
    async fn connect(&self, setup: UpstreamSetup) -> UpstreamResult<Arc<dyn UpstreamAdapter>>;
}
