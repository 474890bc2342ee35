//! Client transport handles and the peer registry.
//!
//! A [`ClientLink`] is the write side of one client WebSocket: every frame
//! bound for the client goes through its channel to the connection's single
//! sender task, so writers never interleave. The [`PeerRegistry`] maps
//! external client IDs to links for direct peer-to-peer signal relay.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use serde_json::value::RawValue;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::handlers::relay::{ClientRoute, OutgoingMessage};

/// Write handle for one client connection.
#[derive(Debug, Clone)]
pub struct ClientLink {
    connection_id: Uuid,
    tx: mpsc::Sender<ClientRoute>,
}

impl ClientLink {
    pub fn new(tx: mpsc::Sender<ClientRoute>) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            tx,
        }
    }

    /// Unique per WebSocket connection; survives re-registration under a new
    /// client ID.
    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    /// Queue a control message. Returns `false` once the connection is gone.
    pub async fn send(&self, message: OutgoingMessage) -> bool {
        self.tx.send(ClientRoute::Outgoing(message)).await.is_ok()
    }

    /// Queue a binary audio frame.
    pub async fn send_audio(&self, frame: Bytes) -> bool {
        self.tx.send(ClientRoute::Audio(frame)).await.is_ok()
    }

    /// Queue `route`, giving up after `wait` if the channel stays full.
    /// Teardown paths use this so a stalled writer cannot hold them up.
    pub async fn send_within(&self, route: ClientRoute, wait: Duration) -> bool {
        match self.tx.send_timeout(route, wait).await {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(route)) => {
                warn!(
                    connection_id = %self.connection_id,
                    route = route.kind(),
                    "Client writer stalled, dropping frame"
                );
                false
            }
            Err(SendTimeoutError::Closed(_)) => false,
        }
    }

    pub async fn ping(&self) -> bool {
        self.tx.send(ClientRoute::Ping).await.is_ok()
    }

    /// Ask the sender task to close the WebSocket after draining queued frames.
    pub async fn close(&self) -> bool {
        self.tx.send(ClientRoute::Close).await.is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn same_connection(&self, other: &ClientLink) -> bool {
        self.connection_id == other.connection_id
    }
}

/// Result of a peer relay attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Delivered,
    /// No peer registered under the target ID
    UnknownTarget,
    /// Target was registered but its connection is gone
    TargetClosed,
}

/// Concurrent map of external client ID to live connection.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: DashMap<String, ClientLink>,
}

impl PeerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `link` under `client_id`. Last write wins: a previous
    /// connection registered under the same ID is replaced.
    pub fn register(&self, client_id: &str, link: ClientLink) {
        if let Some(previous) = self.peers.insert(client_id.to_string(), link.clone())
            && !previous.same_connection(&link)
        {
            info!(
                client_id = %client_id,
                "Client re-registered from a new connection, replacing previous entry"
            );
        }
    }

    /// Remove `client_id` only if it is still bound to `link`'s connection.
    /// A newer registration from another connection is left untouched.
    pub fn unregister(&self, client_id: &str, link: &ClientLink) -> bool {
        let removed = self
            .peers
            .remove_if(client_id, |_, current| current.same_connection(link))
            .is_some();
        if removed {
            debug!(client_id = %client_id, "Client unregistered");
        }
        removed
    }

    pub fn lookup(&self, client_id: &str) -> Option<ClientLink> {
        self.peers.get(client_id).map(|entry| entry.value().clone())
    }

    /// Forward `payload` to `target_client_id`, tagged with the sender's ID.
    /// Undeliverable signals are dropped and logged, never reported back.
    pub async fn relay(
        &self,
        sender_client_id: &str,
        target_client_id: &str,
        payload: Box<RawValue>,
    ) -> RelayOutcome {
        // Clone the link out so no map guard is held across the send.
        let Some(target) = self.lookup(target_client_id) else {
            info!(
                sender = %sender_client_id,
                target = %target_client_id,
                "Dropping peer signal for unregistered target"
            );
            return RelayOutcome::UnknownTarget;
        };

        let delivered = target
            .send(OutgoingMessage::PeerSignal {
                sender_client_id: sender_client_id.to_string(),
                payload,
            })
            .await;

        if delivered {
            debug!(sender = %sender_client_id, target = %target_client_id, "Peer signal relayed");
            RelayOutcome::Delivered
        } else {
            warn!(
                sender = %sender_client_id,
                target = %target_client_id,
                "Dropping peer signal, target connection closed"
            );
            RelayOutcome::TargetClosed
        }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
