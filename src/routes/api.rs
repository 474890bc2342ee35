use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::api;
use crate::state::AppState;
use std::sync::Arc;

/// Create the public HTTP router
///
/// - `GET /` - liveness check, plain `OK`
/// - `GET /stats` - active sessions, registered peers and open sockets
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(api::health_check))
        .route("/stats", get(api::stats))
        .layer(TraceLayer::new_for_http())
}
