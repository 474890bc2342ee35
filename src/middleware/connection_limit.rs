//! WebSocket admission control.
//!
//! Upgrade requests must obtain a [`ConnectionSlot`] before they reach the
//! relay handler. The slot counts against the global and per-IP limits held in
//! [`AppState`] and gives its place back when dropped, whether the socket ran
//! to completion or the upgrade was rejected further down the stack.
//!
//! ```ignore
//! let app = Router::new()
//!     .route("/ws", get(relay_handler))
//!     .layer(axum::middleware::from_fn_with_state(
//!         state.clone(),
//!         connection_limit_middleware,
//!     ));
//! ```

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::state::{AppState, ConnectionLimitError};

/// One admitted WebSocket connection. Released on drop.
pub struct ConnectionSlot {
    state: Arc<AppState>,
    ip: IpAddr,
}

impl ConnectionSlot {
    /// Reserve a slot for `ip`, or report which limit is exhausted.
    pub fn acquire(state: Arc<AppState>, ip: IpAddr) -> Result<Self, ConnectionLimitError> {
        state.try_acquire_connection(ip)?;
        Ok(Self { state, ip })
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.state.release_connection(self.ip);
    }
}

impl fmt::Debug for ConnectionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSlot").field("ip", &self.ip).finish()
    }
}

fn is_websocket_upgrade(request: &Request<Body>) -> bool {
    request
        .headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

/// Admit WebSocket upgrades subject to connection limits.
///
/// Plain HTTP requests pass straight through. Upgrades get a shared
/// `Arc<ConnectionSlot>` extension; the handler keeps it alive for the
/// lifetime of the socket. Over the global limit the answer is
/// `503 Service Unavailable`, over the per-IP limit `429 Too Many Requests`.
pub async fn connection_limit_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if !is_websocket_upgrade(&request) {
        return next.run(request).await;
    }

    let client_ip = addr.ip();
    match ConnectionSlot::acquire(state, client_ip) {
        Ok(slot) => {
            tracing::debug!(ip = %client_ip, "WebSocket connection admitted");
            request.extensions_mut().insert(Arc::new(slot));
            next.run(request).await
        }
        Err(ConnectionLimitError::GlobalLimitReached) => {
            tracing::warn!(ip = %client_ip, "Rejecting connection: global limit reached");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Server at capacity. Please try again later.",
            )
                .into_response()
        }
        Err(ConnectionLimitError::PerIpLimitReached) => {
            tracing::warn!(ip = %client_ip, "Rejecting connection: per-IP limit reached");
            (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many connections from your IP address.",
            )
                .into_response()
        }
    }
}
