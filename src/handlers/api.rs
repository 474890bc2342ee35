use std::sync::Arc;

use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;

use crate::state::AppState;

/// Health check handler
pub async fn health_check() -> impl IntoResponse {
    "OK"
}

/// Live counters exposed on `/stats`
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RelayStats {
    pub active_sessions: usize,
    pub registered_peers: usize,
    pub websocket_connections: usize,
}

/// Relay statistics handler
pub async fn stats(State(state): State<Arc<AppState>>) -> Json<RelayStats> {
    Json(RelayStats {
        active_sessions: state.sessions.len(),
        registered_peers: state.peers.len(),
        websocket_connections: state.ws_connection_count(),
    })
}
