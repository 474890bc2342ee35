//! Relay WebSocket route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::relay_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the relay WebSocket router
///
/// # Endpoint
///
/// `GET /ws` - WebSocket upgrade
///
/// # Protocol
///
/// Text frames carry JSON control messages tagged by `type`:
/// `register`, `start_call`, `hangup`, `ping`, `peer_signal`, `text`.
/// Binary frames carry PCM16 mono little-endian audio for the active call.
///
/// The server answers with `registered`, `session_created`, `pong`,
/// `peer_signal`, `transcript`, `turn_complete`, `clear_buffer` and `error`
/// control messages, plus binary frames of synthesized audio.
///
/// # Example
///
/// ```json
/// {"type": "register", "clientId": "alice"}
/// {"type": "registered", "success": true}
/// {"type": "start_call", "clientId": "alice", "sessionId": "s1"}
/// {"type": "session_created", "sessionId": "s1", "success": true}
/// ```
pub fn create_relay_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws", get(relay_handler))
        .layer(TraceLayer::new_for_http())
}
