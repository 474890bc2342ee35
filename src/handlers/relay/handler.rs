//! Relay WebSocket handler
//!
//! One task per client connection reads frames and drives the control-plane
//! state machine (`UNREGISTERED → REGISTERED → IN_CALL → CLOSED`). All writes
//! to the client go through a single sender task fed by a channel, so control
//! messages, audio and close frames never interleave.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        Extension, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::messages::{
    ClientRoute, IncomingMessage, OutgoingMessage, PeerSignalRequest, RegisterRequest,
    StartCallRequest,
};
use crate::core::audio::validate_frame;
use crate::core::peers::ClientLink;
use crate::core::session::{CloseReason, Session, SessionRequest};
use crate::errors::RelayError;
use crate::middleware::ConnectionSlot;
use crate::state::AppState;

/// Channel buffer between the connection and its sender task
const CHANNEL_BUFFER_SIZE: usize = 256;

/// How long teardown waits for queued frames to be written
const SENDER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection state machine phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Unregistered,
    Registered,
    InCall,
    Closed,
}

/// WebSocket upgrade handler for `/ws`
pub async fn relay_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    slot: Option<Extension<Arc<ConnectionSlot>>>,
) -> Response {
    let max_frame = state.config.relay.max_frame_bytes;

    ws.max_frame_size(max_frame)
        .max_message_size(max_frame)
        .on_upgrade(move |socket| async move {
            handle_relay_socket(socket, state).await;
            // The admission slot is held until the socket is done.
            drop(slot);
        })
}

/// Per-connection control-plane state.
struct RelayConnection {
    state: Arc<AppState>,
    link: ClientLink,
    phase: ConnectionPhase,
    client_id: Option<String>,
    subject_id: Option<String>,
    session: Option<Arc<Session>>,
}

impl RelayConnection {
    fn new(state: Arc<AppState>, link: ClientLink) -> Self {
        Self {
            state,
            link,
            phase: ConnectionPhase::Unregistered,
            client_id: None,
            subject_id: None,
            session: None,
        }
    }

    /// The live session, if any. A session torn down from elsewhere (reaper,
    /// upstream failure) drops the connection back to `Registered`.
    fn active_session(&mut self) -> Option<Arc<Session>> {
        if let Some(session) = &self.session
            && session.is_closed()
        {
            debug!(session_id = %session.id(), "Session ended elsewhere");
            self.session = None;
            self.phase = ConnectionPhase::Registered;
        }
        self.session.clone()
    }

    async fn reply(&self, message: OutgoingMessage) {
        if !self.link.send(message).await {
            debug!("Client channel closed, dropping reply");
        }
    }

    async fn reply_error(&self, error: &RelayError) {
        self.reply(OutgoingMessage::from(error)).await;
    }

    async fn handle_text(&mut self, text: &str) {
        if let Some(session) = self.active_session() {
            session.touch();
        }

        let message = match IncomingMessage::parse(text) {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!("Ignoring control message of unknown type");
                return;
            }
            Err(e) => {
                warn!(client_id = ?self.client_id, "Malformed control message: {}", e);
                self.reply_error(&e).await;
                return;
            }
        };

        debug!(kind = message.kind(), phase = ?self.phase, "Control message");
        match message {
            IncomingMessage::Register(request) => self.handle_register(request).await,
            IncomingMessage::StartCall(request) => self.handle_start_call(request).await,
            IncomingMessage::Hangup => self.handle_hangup().await,
            IncomingMessage::Ping => self.reply(OutgoingMessage::Pong).await,
            IncomingMessage::PeerSignal(request) => self.handle_peer_signal(request).await,
            IncomingMessage::Text(request) => self.handle_user_text(&request.text).await,
        }
    }

    async fn handle_register(&mut self, request: RegisterRequest) {
        if self.active_session().is_some() {
            self.reply_error(&RelayError::call_in_progress()).await;
            return;
        }

        let identity = match self.state.collaborators.identity.resolve(&request.client_id).await {
            Ok(identity) => identity,
            Err(e) => {
                let error = RelayError::from(e);
                warn!(client_id = %request.client_id, "Registration failed: {}", error);
                self.reply_error(&error).await;
                return;
            }
        };

        if let Some(previous) = self.client_id.take()
            && previous != request.client_id
        {
            self.state.peers.unregister(&previous, &self.link);
        }

        self.state.peers.register(&request.client_id, self.link.clone());
        info!(
            client_id = %request.client_id,
            subject_id = %identity.subject_id,
            "Client registered"
        );
        self.client_id = Some(request.client_id);
        self.subject_id = Some(identity.subject_id);
        self.phase = ConnectionPhase::Registered;
        self.reply(OutgoingMessage::Registered { success: true }).await;
    }

    async fn handle_start_call(&mut self, request: StartCallRequest) {
        let (Some(client_id), Some(subject_id)) = (self.client_id.clone(), self.subject_id.clone())
        else {
            self.reply_error(&RelayError::not_registered()).await;
            return;
        };
        if self.active_session().is_some() {
            self.reply_error(&RelayError::call_in_progress()).await;
            return;
        }

        let requested_id = request.session_id.clone().unwrap_or_default();
        if request.client_id != client_id {
            warn!(
                registered = %client_id,
                requested = %request.client_id,
                "start_call for a client ID other than the registered one"
            );
            self.reply(OutgoingMessage::SessionCreated {
                session_id: requested_id,
                success: false,
            })
            .await;
            return;
        }

        let session_request = SessionRequest {
            client_id,
            subject_id,
            session_id: request.session_id,
        };
        match self
            .state
            .sessions
            .create_session(session_request, self.link.clone())
            .await
        {
            Ok(session) => {
                // Queued ahead of anything the upstream sends.
                self.reply(OutgoingMessage::SessionCreated {
                    session_id: session.id().to_string(),
                    success: true,
                })
                .await;
                self.state.sessions.activate(&session);
                self.session = Some(session);
                self.phase = ConnectionPhase::InCall;
            }
            Err(e) => {
                warn!(client_id = ?self.client_id, "Failed to start call: {}", e);
                self.reply(OutgoingMessage::SessionCreated {
                    session_id: requested_id,
                    success: false,
                })
                .await;
                self.reply_error(&e).await;
            }
        }
    }

    async fn handle_hangup(&mut self) {
        let Some(session) = self.active_session() else {
            self.reply_error(&RelayError::no_active_call()).await;
            return;
        };
        self.state
            .sessions
            .close(session.id(), CloseReason::Hangup)
            .await;
        self.session = None;
        self.phase = ConnectionPhase::Registered;
    }

    async fn handle_peer_signal(&mut self, request: PeerSignalRequest) {
        let Some(client_id) = self.client_id.as_deref() else {
            self.reply_error(&RelayError::not_registered()).await;
            return;
        };
        self.state
            .peers
            .relay(client_id, &request.target_client_id, request.payload)
            .await;
    }

    async fn handle_user_text(&mut self, text: &str) {
        let Some(session) = self.active_session() else {
            self.reply_error(&RelayError::no_active_call()).await;
            return;
        };
        if let Err(e) = session.forward_text(text).await {
            warn!(session_id = %session.id(), "Failed to forward text: {}", e);
            self.reply_error(&RelayError::from(e)).await;
        }
    }

    async fn handle_audio(&mut self, frame: Bytes) {
        let Some(session) = self.active_session() else {
            debug!(bytes = frame.len(), "Dropping audio frame outside a call");
            return;
        };
        session.touch();
        if let Err(e) = validate_frame(&frame, self.state.config.relay.max_frame_bytes) {
            warn!(session_id = %session.id(), "Dropping audio frame: {}", e);
            return;
        }
        if let Err(e) = session.forward_audio(frame).await {
            // The upstream loop owns teardown on transport failure.
            debug!(session_id = %session.id(), "Failed to forward audio: {}", e);
        }
    }

    /// Client went away: close any session, leave the peer registry.
    async fn teardown(&mut self) {
        if let Some(session) = self.session.take() {
            self.state
                .sessions
                .close(session.id(), CloseReason::ClientDisconnected)
                .await;
        }
        if let Some(client_id) = self.client_id.take() {
            self.state.peers.unregister(&client_id, &self.link);
        }
        self.phase = ConnectionPhase::Closed;
    }
}

/// Handle the relay WebSocket connection
async fn handle_relay_socket(socket: WebSocket, app_state: Arc<AppState>) {
    info!("Relay WebSocket connection established");

    let (mut sender, mut receiver) = socket.split();
    let (message_tx, mut message_rx) = mpsc::channel::<ClientRoute>(CHANNEL_BUFFER_SIZE);

    // Fired when the sender task stops writing, e.g. after a server-initiated close
    let writer_done = CancellationToken::new();

    // Sender task for outgoing messages
    let sender_task = tokio::spawn({
        let writer_done = writer_done.clone();
        async move {
            while let Some(route) = message_rx.recv().await {
                let should_close = matches!(route, ClientRoute::Close);

                let result = match route {
                    ClientRoute::Outgoing(message) => match serde_json::to_string(&message) {
                        Ok(json_str) => sender.send(Message::Text(json_str.into())).await,
                        Err(e) => {
                            error!("Failed to serialize outgoing message: {}", e);
                            continue;
                        }
                    },
                    ClientRoute::Audio(data) => sender.send(Message::Binary(data)).await,
                    ClientRoute::Ping => sender.send(Message::Ping(Bytes::new())).await,
                    ClientRoute::Close => {
                        info!("Closing relay WebSocket connection");
                        sender.send(Message::Close(None)).await
                    }
                };

                if let Err(e) = result {
                    debug!("Failed to send WebSocket message: {}", e);
                    break;
                }

                if should_close {
                    break;
                }
            }
            writer_done.cancel();
        }
    });

    let link = ClientLink::new(message_tx);
    let mut connection = RelayConnection::new(app_state.clone(), link.clone());

    // Read deadline; refreshed by every received frame
    let read_timeout = app_state.config.client_read_timeout();
    let mut idle_check = tokio::time::interval(read_timeout / 3);
    idle_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_frame = Instant::now();
    let mut pinged = false;

    loop {
        tokio::select! {
            msg_result = receiver.next() => {
                last_frame = Instant::now();
                pinged = false;

                match msg_result {
                    Some(Ok(Message::Text(text))) => connection.handle_text(text.as_str()).await,
                    Some(Ok(Message::Binary(data))) => connection.handle_audio(data).await,
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "Client closed the connection");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(client_id = ?connection.client_id, "WebSocket read error: {}", e);
                        break;
                    }
                    None => break,
                }
            }
            _ = idle_check.tick() => {
                let idle = last_frame.elapsed();
                if idle >= read_timeout {
                    info!(
                        client_id = ?connection.client_id,
                        idle_secs = idle.as_secs(),
                        "Client read deadline exceeded, closing connection"
                    );
                    break;
                }
                if idle >= read_timeout / 2 && !pinged {
                    pinged = link.ping().await;
                }
            }
            _ = writer_done.cancelled() => {
                debug!("Writer finished, ending connection");
                break;
            }
            _ = app_state.shutdown.cancelled() => {
                info!("Server shutting down, closing connection");
                break;
            }
        }
    }

    connection.teardown().await;

    // Ask the writer to finish; whatever is queued goes out first.
    link.close().await;
    drop(link);
    drop(connection);
    if tokio::time::timeout(SENDER_DRAIN_TIMEOUT, sender_task).await.is_err() {
        warn!("Timed out draining relay WebSocket writer");
    }

    info!("Relay WebSocket connection terminated");
}
