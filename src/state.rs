//! Shared application state.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ServerConfig;
use crate::core::collaborators::{CollaboratorError, Collaborators};
use crate::core::peers::PeerRegistry;
use crate::core::session::SessionManager;
use crate::core::upstream::{LiveConfig, LiveConnector, UpstreamConnector};

/// Why a WebSocket connection slot could not be acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionLimitError {
    GlobalLimitReached,
    PerIpLimitReached,
}

/// State shared by every handler.
pub struct AppState {
    pub config: ServerConfig,
    pub peers: Arc<PeerRegistry>,
    pub sessions: Arc<SessionManager>,
    pub collaborators: Collaborators,
    /// Fired once on server shutdown
    pub shutdown: CancellationToken,
    ws_connections: AtomicUsize,
    ip_connections: DashMap<IpAddr, usize>,
}

impl AppState {
    /// Build state with the live upstream connector and the collaborators
    /// described by `config`.
    pub fn new(config: ServerConfig) -> Result<Arc<Self>, CollaboratorError> {
        let collaborators = Collaborators::from_config(&config)?;
        let connector = Arc::new(LiveConnector::new(LiveConfig::from_server_config(&config)));
        Ok(Self::with_parts(config, connector, collaborators))
    }

    /// Build state from explicit parts.
    pub fn with_parts(
        config: ServerConfig,
        connector: Arc<dyn UpstreamConnector>,
        collaborators: Collaborators,
    ) -> Arc<Self> {
        let sessions = SessionManager::new(
            connector,
            collaborators.clone(),
            config.session_settings(),
        );
        Arc::new(Self {
            config,
            peers: PeerRegistry::new(),
            sessions,
            collaborators,
            shutdown: CancellationToken::new(),
            ws_connections: AtomicUsize::new(0),
            ip_connections: DashMap::new(),
        })
    }

    /// Reserve a WebSocket slot for `ip`, enforcing the global and per-IP
    /// limits.
    pub fn try_acquire_connection(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        // Per-IP check and increment happen under the entry lock.
        let per_ip_limit = self.config.max_connections_per_ip as usize;
        if per_ip_limit == 0 {
            return Err(ConnectionLimitError::PerIpLimitReached);
        }
        let mut per_ip = self.ip_connections.entry(ip).or_insert(0);
        if *per_ip >= per_ip_limit {
            return Err(ConnectionLimitError::PerIpLimitReached);
        }

        if let Some(max) = self.config.max_websocket_connections {
            let acquired = self
                .ws_connections
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                    (current < max).then_some(current + 1)
                })
                .is_ok();
            if !acquired {
                let empty = *per_ip == 0;
                drop(per_ip);
                if empty {
                    self.ip_connections.remove_if(&ip, |_, count| *count == 0);
                }
                return Err(ConnectionLimitError::GlobalLimitReached);
            }
        } else {
            self.ws_connections.fetch_add(1, Ordering::AcqRel);
        }

        *per_ip += 1;
        Ok(())
    }

    /// Release a slot taken by [`try_acquire_connection`](Self::try_acquire_connection).
    pub fn release_connection(&self, ip: IpAddr) {
        let _ = self
            .ws_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(1)
            });
        if let Some(mut count) = self.ip_connections.get_mut(&ip) {
            *count = count.saturating_sub(1);
        }
        self.ip_connections.remove_if(&ip, |_, count| *count == 0);
    }

    pub fn ws_connection_count(&self) -> usize {
        self.ws_connections.load(Ordering::Acquire)
    }

    pub fn ip_connection_count(&self, ip: &IpAddr) -> usize {
        self.ip_connections.get(ip).map(|c| *c).unwrap_or(0)
    }

    /// Stop background work and close every live session.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let closed = self
            .sessions
            .close_all(crate::core::session::CloseReason::Shutdown)
            .await;
        info!(closed, "All sessions closed");
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("address", &self.config.address())
            .field("sessions", &self.sessions.len())
            .field("peers", &self.peers.len())
            .field("ws_connections", &self.ws_connection_count())
            .finish()
    }
}
