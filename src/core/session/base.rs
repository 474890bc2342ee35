use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::insight::PendingInsight;
use crate::core::audio::OutboundAudioBuffer;
use crate::core::peers::ClientLink;
use crate::core::upstream::{UpstreamAdapter, UpstreamResult};
use crate::handlers::relay::{ClientRoute, OutgoingMessage};

/// Longest a teardown write waits for room in the client's queue.
pub const TEARDOWN_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Why a session is being torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Client sent `hangup`; the connection stays open and registered
    Hangup,
    /// The client transport went away
    ClientDisconnected,
    /// Reaped after inactivity
    IdleTimeout,
    /// The upstream stream failed
    UpstreamFailure,
    /// Server shutting down
    Shutdown,
}

impl CloseReason {
    /// Whether the client WebSocket is closed along with the session.
    pub fn closes_client(self) -> bool {
        matches!(
            self,
            CloseReason::IdleTimeout | CloseReason::UpstreamFailure | CloseReason::Shutdown
        )
    }

    /// Error notice sent to the client before a server-initiated close.
    fn notice(self) -> Option<OutgoingMessage> {
        match self {
            CloseReason::IdleTimeout => Some(OutgoingMessage::error(
                "Session closed after inactivity",
                Some("session_timeout"),
            )),
            CloseReason::UpstreamFailure => Some(OutgoingMessage::error(
                "Upstream connection failed",
                Some("upstream_error"),
            )),
            _ => None,
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CloseReason::Hangup => "hangup",
            CloseReason::ClientDisconnected => "client_disconnected",
            CloseReason::IdleTimeout => "idle_timeout",
            CloseReason::UpstreamFailure => "upstream_failure",
            CloseReason::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// One live pairing of a client connection and an upstream connection.
///
/// The session is the only owner allowed to close either transport; that
/// happens exactly once, in [`Session::shutdown`].
pub struct Session {
    id: String,
    client_id: String,
    subject_id: String,
    client: ClientLink,
    upstream: Arc<dyn UpstreamAdapter>,
    cancel: CancellationToken,
    last_activity: Mutex<Instant>,
    outbound: OutboundAudioBuffer,
    insight: PendingInsight,
    active: AtomicBool,
    closed: AtomicBool,
}

impl Session {
    pub fn new(
        id: String,
        client_id: String,
        subject_id: String,
        client: ClientLink,
        upstream: Arc<dyn UpstreamAdapter>,
        min_flush_bytes: usize,
    ) -> Self {
        Self {
            id,
            client_id,
            subject_id,
            client,
            upstream,
            cancel: CancellationToken::new(),
            last_activity: Mutex::new(Instant::now()),
            outbound: OutboundAudioBuffer::new(min_flush_bytes),
            insight: PendingInsight::new(),
            active: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn client(&self) -> &ClientLink {
        &self.client
    }

    pub fn upstream(&self) -> &Arc<dyn UpstreamAdapter> {
        &self.upstream
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn insight(&self) -> &PendingInsight {
        &self.insight
    }

    pub fn outbound(&self) -> &OutboundAudioBuffer {
        &self.outbound
    }

    /// Record client activity for the idle reaper.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    pub fn idle_for(&self) -> Duration {
        Instant::now().saturating_duration_since(self.last_activity())
    }

    /// Flip the session to active. Returns `true` only for the first caller.
    pub(crate) fn mark_active(&self) -> bool {
        !self.active.swap(true, Ordering::AcqRel)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Forward one inbound frame to the upstream, frame by frame.
    pub async fn forward_audio(&self, frame: Bytes) -> UpstreamResult<()> {
        self.touch();
        self.upstream.send_audio(frame).await
    }

    /// Forward user text to the upstream.
    pub async fn forward_text(&self, text: &str) -> UpstreamResult<()> {
        self.touch();
        self.upstream.send_text(text).await
    }

    /// Buffer an upstream audio chunk, writing a frame to the client each
    /// time the flush threshold is crossed.
    pub async fn relay_audio_chunk(&self, chunk: &[u8]) {
        if let Some(frame) = self.outbound.push(chunk) {
            let bytes = frame.len();
            if !self.client.send_audio(frame).await {
                debug!(session_id = %self.id, bytes, "Client gone, dropping audio frame");
            }
        }
    }

    /// Barge-in: discard buffered output and tell the client to drop its
    /// playback queue.
    pub async fn interrupt(&self) {
        let discarded = self.outbound.discard();
        debug!(session_id = %self.id, bytes = discarded, "Upstream interrupted, discarding output");
        self.client.send(OutgoingMessage::ClearBuffer).await;
    }

    /// Tear down both transports. Only the first call does anything.
    ///
    /// Order: final audio flush, teardown notice, cancellation, upstream
    /// close, then client close when `reason` calls for it. Client writes
    /// wait at most [`TEARDOWN_WRITE_TIMEOUT`]; once one is dropped the
    /// remaining ones are skipped.
    pub async fn shutdown(&self, reason: CloseReason) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }

        let mut writable = true;
        if let Some(rest) = self.outbound.drain_final() {
            debug!(session_id = %self.id, bytes = rest.len(), "Flushing remaining audio");
            writable = self.final_write(ClientRoute::Audio(rest)).await;
        }
        if writable && let Some(notice) = reason.notice() {
            writable = self.final_write(ClientRoute::Outgoing(notice)).await;
        }

        self.cancel.cancel();

        if let Err(e) = self.upstream.close().await {
            warn!(session_id = %self.id, "Error closing upstream: {}", e);
        }
        if reason.closes_client() {
            if writable {
                self.final_write(ClientRoute::Close).await;
            } else {
                debug!(session_id = %self.id, "Client unresponsive, skipping close frame");
            }
        }

        info!(
            session_id = %self.id,
            client_id = %self.client_id,
            reason = %reason,
            "Session closed"
        );
        true
    }

    async fn final_write(&self, route: ClientRoute) -> bool {
        self.client.send_within(route, TEARDOWN_WRITE_TIMEOUT).await
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("client_id", &self.client_id)
            .field("subject_id", &self.subject_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
