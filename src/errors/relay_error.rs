use thiserror::Error;

use crate::core::collaborators::CollaboratorError;
use crate::core::upstream::UpstreamError;

/// Errors raised while handling a client connection.
///
/// Request-level variants are reported to the client as an `error` control
/// message carrying [`RelayError::code`]. Session-level variants funnel into
/// the session close path.
#[derive(Debug, Error)]
pub enum RelayError {
    /// `register` (or `start_call`) named an identity the resolver does not know
    #[error("Identity not found: {0}")]
    IdentityNotFound(String),

    /// The upstream service could not be reached or rejected the handshake
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Either transport went away
    #[error("Transport closed: {0}")]
    TransportClosed(String),

    /// A single control message or audio frame could not be understood
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// A tool call failed; isolated to that call
    #[error("Tool failure: {0}")]
    ToolFailure(String),

    /// The upstream stream itself failed mid-session
    #[error("Unrecoverable upstream error: {0}")]
    UnrecoverableUpstreamError(String),

    /// Message is not valid in the connection's current state
    #[error("{message}")]
    InvalidState {
        code: &'static str,
        message: String,
    },
}

/// Result type for control-plane operations.
pub type RelayResult<T> = Result<T, RelayError>;

impl RelayError {
    pub fn not_registered() -> Self {
        Self::InvalidState {
            code: "not_registered",
            message: "Client must register first".to_string(),
        }
    }

    pub fn call_in_progress() -> Self {
        Self::InvalidState {
            code: "call_in_progress",
            message: "A call is already in progress on this connection".to_string(),
        }
    }

    pub fn no_active_call() -> Self {
        Self::InvalidState {
            code: "no_active_call",
            message: "No active call on this connection".to_string(),
        }
    }

    pub fn session_exists(session_id: &str) -> Self {
        Self::InvalidState {
            code: "session_exists",
            message: format!("Session {session_id} already exists"),
        }
    }

    /// Stable code sent to clients in `error` messages.
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::IdentityNotFound(_) => "identity_not_found",
            RelayError::UpstreamUnavailable(_) => "upstream_unavailable",
            RelayError::TransportClosed(_) => "transport_closed",
            RelayError::MalformedMessage(_) => "malformed_message",
            RelayError::ToolFailure(_) => "tool_failure",
            RelayError::UnrecoverableUpstreamError(_) => "upstream_error",
            RelayError::InvalidState { code, .. } => code,
        }
    }

    /// Whether the error ends the session it occurred in.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RelayError::TransportClosed(_) | RelayError::UnrecoverableUpstreamError(_)
        )
    }
}

impl From<CollaboratorError> for RelayError {
    fn from(err: CollaboratorError) -> Self {
        match err {
            CollaboratorError::NotFound(id) => RelayError::IdentityNotFound(id),
            other => RelayError::UpstreamUnavailable(other.to_string()),
        }
    }
}

impl From<UpstreamError> for RelayError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::ConnectionFailed(_)
            | UpstreamError::HandshakeFailed(_)
            | UpstreamError::Timeout(_) => RelayError::UpstreamUnavailable(err.to_string()),
            UpstreamError::NotConnected | UpstreamError::Closed => {
                RelayError::TransportClosed(err.to_string())
            }
            other => RelayError::UnrecoverableUpstreamError(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(
            RelayError::IdentityNotFound("c1".into()).code(),
            "identity_not_found"
        );
        assert_eq!(RelayError::not_registered().code(), "not_registered");
        assert_eq!(RelayError::call_in_progress().code(), "call_in_progress");
        assert_eq!(RelayError::no_active_call().code(), "no_active_call");
        assert_eq!(
            RelayError::MalformedMessage("x".into()).code(),
            "malformed_message"
        );
    }

    #[test]
    fn test_collaborator_not_found_maps_to_identity_not_found() {
        let err: RelayError = CollaboratorError::NotFound("ghost".into()).into();
        assert!(matches!(err, RelayError::IdentityNotFound(ref id) if id == "ghost"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_upstream_errors_map_by_severity() {
        let err: RelayError = UpstreamError::HandshakeFailed("boom".into()).into();
        assert!(matches!(err, RelayError::UpstreamUnavailable(_)));

        let err: RelayError = UpstreamError::WebSocketError("reset".into()).into();
        assert!(matches!(err, RelayError::UnrecoverableUpstreamError(_)));
        assert!(err.is_fatal());
    }
}
