use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::base::{CloseReason, Session};
use crate::core::audio::DEFAULT_MIN_FLUSH_BYTES;
use crate::core::collaborators::Collaborators;
use crate::core::peers::ClientLink;
use crate::core::tools::{ToolContext, ToolDispatcher};
use crate::core::upstream::{TranscriptRole, UpstreamConnector, UpstreamEvent, UpstreamSetup};
use crate::errors::{RelayError, RelayResult};
use crate::handlers::relay::OutgoingMessage;

/// Timing and buffering knobs for sessions.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub min_flush_bytes: usize,
    pub idle_timeout: Duration,
    pub reaper_interval: Duration,
    pub tool_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            min_flush_bytes: DEFAULT_MIN_FLUSH_BYTES,
            idle_timeout: Duration::from_secs(30 * 60),
            reaper_interval: Duration::from_secs(5 * 60),
            tool_timeout: Duration::from_secs(30),
        }
    }
}

/// Parameters for [`SessionManager::create_session`].
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub client_id: String,
    pub subject_id: String,
    /// Caller-chosen ID; generated when absent
    pub session_id: Option<String>,
}

/// Owns every live [`Session`], keyed by session ID.
pub struct SessionManager {
    sessions: DashMap<String, Arc<Session>>,
    connector: Arc<dyn UpstreamConnector>,
    collaborators: Collaborators,
    dispatcher: ToolDispatcher,
    settings: SessionSettings,
}

impl SessionManager {
    pub fn new(
        connector: Arc<dyn UpstreamConnector>,
        collaborators: Collaborators,
        settings: SessionSettings,
    ) -> Arc<Self> {
        let dispatcher = ToolDispatcher::new(collaborators.tools.clone(), settings.tool_timeout);
        Arc::new(Self {
            sessions: DashMap::new(),
            connector,
            collaborators,
            dispatcher,
            settings,
        })
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Open the upstream for a new session and register it.
    ///
    /// The session only becomes visible to [`lookup`](Self::lookup) after the
    /// upstream handshake succeeded. On any failure nothing is registered and
    /// no upstream transport is left open. Upstream events are not read until
    /// [`activate`](Self::activate) is called, so the caller can queue its
    /// acknowledgement to the client first.
    pub async fn create_session(
        self: &Arc<Self>,
        request: SessionRequest,
        client: ClientLink,
    ) -> RelayResult<Arc<Session>> {
        let session_id = request
            .session_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if self.sessions.contains_key(&session_id) {
            return Err(RelayError::session_exists(&session_id));
        }

        let instructions = self
            .collaborators
            .instructions
            .build(&request.subject_id)
            .await
            .map_err(|e| {
                RelayError::UpstreamUnavailable(format!("Failed to build instructions: {e}"))
            })?;

        let setup = UpstreamSetup {
            session_id: session_id.clone(),
            instructions,
            tools: self.dispatcher.registry().declarations(),
        };
        let upstream = self
            .connector
            .connect(setup)
            .await
            .map_err(|e| RelayError::UpstreamUnavailable(e.to_string()))?;

        let session = Arc::new(Session::new(
            session_id.clone(),
            request.client_id,
            request.subject_id,
            client,
            upstream.clone(),
            self.settings.min_flush_bytes,
        ));

        let inserted = match self.sessions.entry(session_id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(session.clone());
                true
            }
        };
        if !inserted {
            // Lost a race with a concurrent start_call for the same ID.
            if let Err(e) = upstream.close().await {
                debug!(session_id = %session_id, "Error closing duplicate upstream: {}", e);
            }
            return Err(RelayError::session_exists(&session_id));
        }

        info!(
            session_id = %session_id,
            client_id = %session.client_id(),
            subject_id = %session.subject_id(),
            "Session created"
        );
        Ok(session)
    }

    /// Start relaying upstream events to the client. Later calls are no-ops.
    pub fn activate(self: &Arc<Self>, session: &Arc<Session>) {
        if session.mark_active() {
            self.spawn_upstream_loop(session.clone());
        }
    }

    pub fn lookup(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(session_id).map(|entry| entry.value().clone())
    }

    /// Remove and tear down a session. Idempotent: returns `false` when the
    /// session was already closed or never existed.
    pub async fn close(&self, session_id: &str, reason: CloseReason) -> bool {
        let Some((_, session)) = self.sessions.remove(session_id) else {
            debug!(session_id = %session_id, reason = %reason, "Close on unknown session ignored");
            return false;
        };
        session.shutdown(reason).await
    }

    /// Close every session idle for longer than `threshold`. Sessions are
    /// closed concurrently so one stalled client cannot hold up the rest.
    pub async fn reap_idle(&self, threshold: Duration) -> usize {
        let idle: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().idle_for() > threshold)
            .map(|entry| entry.key().clone())
            .collect();

        let closes = idle.iter().map(|session_id| {
            info!(session_id = %session_id, "Reaping idle session");
            self.close(session_id, CloseReason::IdleTimeout)
        });
        join_all(closes).await.into_iter().filter(|closed| *closed).count()
    }

    /// Run [`reap_idle`](Self::reap_idle) every `reaper_interval` until
    /// `shutdown` fires.
    pub fn spawn_reaper(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let manager = self.clone();
        let period = self.settings.reaper_interval;
        let threshold = self.settings.idle_timeout;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(
                interval_secs = period.as_secs(),
                idle_timeout_secs = threshold.as_secs(),
                "Session reaper started"
            );

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let reaped = manager.reap_idle(threshold).await;
                        if reaped > 0 {
                            info!(reaped, active = manager.len(), "Reaper closed idle sessions");
                        }
                    }
                }
            }
            info!("Session reaper stopped");
        })
    }

    /// Close every session, e.g. on shutdown.
    pub async fn close_all(&self, reason: CloseReason) -> usize {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let closes = ids.iter().map(|session_id| self.close(session_id, reason));
        join_all(closes).await.into_iter().filter(|closed| *closed).count()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Spawn the upstream→client loop, supervised so that a panic inside it
    /// tears down only this session.
    fn spawn_upstream_loop(self: &Arc<Self>, session: Arc<Session>) {
        let manager = self.clone();
        let session_id = session.id().to_string();
        let worker = tokio::spawn(manager.clone().upstream_loop(session));

        tokio::spawn(async move {
            if let Err(e) = worker.await
                && e.is_panic()
            {
                error!(session_id = %session_id, "Upstream loop panicked: {}", e);
                manager.close(&session_id, CloseReason::UpstreamFailure).await;
            }
        });
    }

    async fn upstream_loop(self: Arc<Self>, session: Arc<Session>) {
        let cancel = session.cancellation_token().clone();
        let upstream = session.upstream().clone();

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = upstream.read_event() => event,
            };

            match event {
                Ok(UpstreamEvent::Error { message }) => {
                    error!(session_id = %session.id(), "Upstream reported error: {}", message);
                    self.close(session.id(), CloseReason::UpstreamFailure).await;
                    break;
                }
                Ok(event) => self.handle_upstream_event(&session, event).await,
                Err(e) => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    warn!(session_id = %session.id(), "Upstream stream ended: {}", e);
                    self.close(session.id(), CloseReason::UpstreamFailure).await;
                    break;
                }
            }
        }
        debug!(session_id = %session.id(), "Upstream loop exited");
    }

    async fn handle_upstream_event(&self, session: &Arc<Session>, event: UpstreamEvent) {
        match event {
            UpstreamEvent::HandshakeAck => {
                debug!(session_id = %session.id(), "Upstream setup acknowledged");
            }
            UpstreamEvent::AudioChunk(chunk) => {
                session.relay_audio_chunk(&chunk).await;
            }
            UpstreamEvent::Interrupted => {
                session.interrupt().await;
            }
            UpstreamEvent::Transcript { role, text } => {
                if role == TranscriptRole::User {
                    self.spawn_insight(session, text.clone());
                }
                session
                    .client()
                    .send(OutgoingMessage::Transcript { role, text })
                    .await;
            }
            UpstreamEvent::ToolCallRequest(call) => {
                info!(
                    session_id = %session.id(),
                    tool = %call.name,
                    call_id = %call.call_id,
                    "Dispatching tool call"
                );
                let ctx = ToolContext {
                    subject_id: session.subject_id().to_string(),
                    session_id: session.id().to_string(),
                    call_id: call.call_id.clone(),
                };
                self.dispatcher
                    .dispatch(call, ctx, Arc::downgrade(session.upstream()));
            }
            UpstreamEvent::TurnComplete => {
                session.client().send(OutgoingMessage::TurnComplete).await;
                if let Some(insight) = session.insight().take() {
                    debug!(session_id = %session.id(), "Injecting pending insight");
                    if let Err(e) = session.upstream().send_text(&context_message(&insight)).await {
                        warn!(session_id = %session.id(), "Failed to inject insight: {}", e);
                    }
                }
            }
            UpstreamEvent::Error { .. } => {}
        }
    }

    /// Ask the insight source about a user transcript in the background and
    /// leave any answer in the session's mailbox.
    fn spawn_insight(&self, session: &Arc<Session>, transcript: String) {
        let Some(source) = self.collaborators.insights.clone() else {
            return;
        };
        let weak: Weak<Session> = Arc::downgrade(session);
        let subject_id = session.subject_id().to_string();

        tokio::spawn(async move {
            match source.insight(&subject_id, &transcript).await {
                Ok(Some(insight)) => match weak.upgrade() {
                    Some(session) if !session.is_closed() => {
                        if session.insight().post(insight).is_some() {
                            debug!(session_id = %session.id(), "Overwrote unconsumed insight");
                        }
                    }
                    _ => debug!("Session ended before insight was ready"),
                },
                Ok(None) => {}
                Err(e) => warn!(subject_id = %subject_id, "Insight request failed: {}", e),
            }
        });
    }
}

/// Wrap an insight so the model treats it as background context.
fn context_message(insight: &str) -> String {
    format!("[Context for this conversation, not spoken by the user] {insight}")
}
