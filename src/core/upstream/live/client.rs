//! Live upstream client.
//!
//! Each session gets its own WebSocket connection. The socket is split once:
//! the sink sits behind the write lock shared by every outbound operation,
//! the stream behind the reader used only by the session's upstream loop.
//!
//! # Example
//!
//! ```rust,ignore
//! use voice_relay_gateway::core::upstream::{LiveConfig, LiveConnector, UpstreamConnector, UpstreamSetup};
//!
//! let connector = LiveConnector::new(LiveConfig::default());
//! let upstream = connector.connect(UpstreamSetup {
//!     session_id: "s1".to_string(),
//!     instructions: "You are a helpful assistant.".to_string(),
//!     tools: vec![],
//! }).await?;
//!
//! upstream.send_audio(frame).await?;
//! while let Ok(event) = upstream.read_event().await {
//!     println!("{event:?}");
//! }
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::config::LiveConfig;
use super::messages::{ClientMessage, ServerMessage};
use crate::core::upstream::base::{
    ToolResult, UpstreamAdapter, UpstreamConnector, UpstreamError, UpstreamEvent, UpstreamResult,
    UpstreamSetup,
};

type LiveSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type LiveSink = SplitSink<LiveSocket, Message>;
type LiveStream = SplitStream<LiveSocket>;

/// Read half plus events already parsed but not yet handed out.
struct LiveReader {
    stream: LiveStream,
    pending: VecDeque<UpstreamEvent>,
}

/// One open live connection.
pub struct LiveUpstream {
    session_id: String,
    input_sample_rate: u32,
    output_sample_rate: u32,
    rate_warned: AtomicBool,
    sink: Mutex<LiveSink>,
    reader: Mutex<LiveReader>,
    open: AtomicBool,
}

impl LiveUpstream {
    fn new(
        session_id: String,
        config: &LiveConfig,
        sink: LiveSink,
        stream: LiveStream,
        pending: VecDeque<UpstreamEvent>,
    ) -> Self {
        Self {
            session_id,
            input_sample_rate: config.input_sample_rate,
            output_sample_rate: config.output_sample_rate,
            rate_warned: AtomicBool::new(false),
            sink: Mutex::new(sink),
            reader: Mutex::new(LiveReader { stream, pending }),
            open: AtomicBool::new(true),
        }
    }

    /// Audio is passed to clients as-is; warn once when the upstream
    /// declares a rate other than the configured output rate.
    fn check_output_rate(&self, message: &ServerMessage) {
        let Some(declared) = message
            .audio_sample_rates()
            .into_iter()
            .find(|rate| *rate != self.output_sample_rate)
        else {
            return;
        };
        if !self.rate_warned.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                session_id = %self.session_id,
                expected = self.output_sample_rate,
                declared,
                "Upstream audio sample rate differs from configured output rate"
            );
        }
    }

    async fn send_message(&self, message: &ClientMessage) -> UpstreamResult<()> {
        if !self.is_open() {
            return Err(UpstreamError::NotConnected);
        }

        let mut sink = self.sink.lock().await;
        if let Err(e) = write_message(&mut sink, message).await {
            self.open.store(false, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }
}

async fn write_message(sink: &mut LiveSink, message: &ClientMessage) -> UpstreamResult<()> {
    let json = serde_json::to_string(message)
        .map_err(|e| UpstreamError::SerializationError(e.to_string()))?;
    sink.send(Message::Text(json.into()))
        .await
        .map_err(|e| UpstreamError::WebSocketError(e.to_string()))
}

/// Parse one transport message.
///
/// Some deployments deliver JSON in binary frames, so binary payloads that
/// look like a JSON object are parsed too. Unparseable payloads are logged
/// and skipped.
fn parse_message(message: &Message) -> Option<ServerMessage> {
    let text = match message {
        Message::Text(text) => text.as_str(),
        Message::Binary(data) if data.first() == Some(&b'{') => {
            match std::str::from_utf8(data) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!("Skipping non-UTF-8 upstream frame: {}", e);
                    return None;
                }
            }
        }
        Message::Binary(data) => {
            tracing::debug!(bytes = data.len(), "Skipping opaque binary upstream frame");
            return None;
        }
        _ => return None,
    };

    ServerMessage::parse(text)
        .inspect_err(|e| tracing::warn!("Failed to parse upstream message: {}", e))
        .ok()
}

#[async_trait]
impl UpstreamAdapter for LiveUpstream {
    async fn send_audio(&self, frame: Bytes) -> UpstreamResult<()> {
        self.send_message(&ClientMessage::audio(&frame, self.input_sample_rate))
            .await
    }

    async fn send_text(&self, text: &str) -> UpstreamResult<()> {
        self.send_message(&ClientMessage::text(text)).await
    }

    async fn send_tool_result(&self, result: ToolResult) -> UpstreamResult<()> {
        self.send_message(&ClientMessage::tool_result(&result)).await
    }

    async fn read_event(&self) -> UpstreamResult<UpstreamEvent> {
        let mut reader = self.reader.lock().await;
        loop {
            if let Some(event) = reader.pending.pop_front() {
                return Ok(event);
            }

            let message = match reader.stream.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    self.open.store(false, Ordering::SeqCst);
                    return Err(UpstreamError::WebSocketError(e.to_string()));
                }
                None => {
                    self.open.store(false, Ordering::SeqCst);
                    return Err(UpstreamError::Closed);
                }
            };

            if let Message::Close(frame) = &message {
                tracing::info!(
                    session_id = %self.session_id,
                    reason = ?frame.as_ref().map(|f| f.reason.as_str().to_string()),
                    "Upstream closed the stream"
                );
                self.open.store(false, Ordering::SeqCst);
                return Err(UpstreamError::Closed);
            }

            if let Some(parsed) = parse_message(&message) {
                self.check_output_rate(&parsed);
                reader.pending.extend(parsed.into_events());
            }
        }
    }

    async fn close(&self) -> UpstreamResult<()> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.close().await {
            tracing::debug!(session_id = %self.session_id, "Upstream close: {}", e);
        }
        tracing::info!(session_id = %self.session_id, "Disconnected from upstream");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Opens [`LiveUpstream`] connections.
#[derive(Debug, Clone)]
pub struct LiveConnector {
    config: Arc<LiveConfig>,
}

impl LiveConnector {
    pub fn new(config: LiveConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &LiveConfig {
        &self.config
    }
}

/// Read until `setupComplete`, keeping any other events for later delivery.
async fn await_setup_complete(
    stream: &mut LiveStream,
    pending: &mut VecDeque<UpstreamEvent>,
) -> UpstreamResult<()> {
    loop {
        let message = match stream.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => return Err(UpstreamError::HandshakeFailed(e.to_string())),
            None => {
                return Err(UpstreamError::HandshakeFailed(
                    "stream ended before setupComplete".to_string(),
                ));
            }
        };
        if let Message::Close(_) = message {
            return Err(UpstreamError::HandshakeFailed(
                "upstream closed during setup".to_string(),
            ));
        }

        let events = parse_message(&message)
            .map(ServerMessage::into_events)
            .unwrap_or_default();
        for event in events {
            let acked = event == UpstreamEvent::HandshakeAck;
            pending.push_back(event);
            if acked {
                return Ok(());
            }
        }
    }
}

impl LiveConnector {
    /// Connect and send `setup`, waiting for `setupComplete` when a
    /// handshake timeout is configured.
    pub async fn connect_live(&self, setup: UpstreamSetup) -> UpstreamResult<LiveUpstream> {
        let url = self.config.build_ws_url()?;

        let (socket, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| UpstreamError::ConnectionFailed(e.to_string()))?;

        tracing::info!(
            session_id = %setup.session_id,
            host = url.host_str().unwrap_or_default(),
            "Connected to upstream"
        );

        let (mut sink, mut stream) = socket.split();

        let payload = ClientMessage::Setup(self.config.setup_payload(&setup));
        if let Err(e) = write_message(&mut sink, &payload).await {
            let _ = sink.close().await;
            return Err(UpstreamError::HandshakeFailed(e.to_string()));
        }

        let mut pending = VecDeque::new();
        if let Some(limit) = self.config.handshake_timeout {
            let outcome =
                tokio::time::timeout(limit, await_setup_complete(&mut stream, &mut pending)).await;
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e),
                Err(_) => Some(UpstreamError::Timeout(format!(
                    "no setupComplete within {}s",
                    limit.as_secs_f32()
                ))),
            };
            if let Some(e) = failure {
                let _ = sink.close().await;
                return Err(e);
            }
        }

        Ok(LiveUpstream::new(
            setup.session_id,
            &self.config,
            sink,
            stream,
            pending,
        ))
    }
}

#[async_trait]
impl UpstreamConnector for LiveConnector {
    async fn connect(&self, setup: UpstreamSetup) -> UpstreamResult<Arc<dyn UpstreamAdapter>> {
        Ok(Arc::new(self.connect_live(setup).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::prelude::*;
    use serde_json::{Value, json};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio_tungstenite::accept_async;

    /// Spawn a one-connection upstream that records client frames and replays `script`.
    async fn spawn_upstream(
        script: Vec<Message>,
        ack: bool,
    ) -> (String, mpsc::UnboundedReceiver<Value>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            let (mut write, mut read) = ws.split();

            // First frame is always the setup message
            if let Some(Ok(Message::Text(text))) = read.next().await {
                let _ = tx.send(serde_json::from_str::<Value>(text.as_str()).unwrap());
            }
            if ack {
                write
                    .send(Message::Text(json!({"setupComplete": {}}).to_string().into()))
                    .await
                    .unwrap();
            }
            for message in script {
                write.send(message).await.unwrap();
            }
            while let Some(Ok(message)) = read.next().await {
                if let Message::Text(text) = message {
                    let _ = tx.send(serde_json::from_str::<Value>(text.as_str()).unwrap());
                }
            }
        });

        (format!("ws://{addr}"), rx)
    }

    fn connector(url: String, handshake_timeout: Option<Duration>) -> LiveConnector {
        LiveConnector::new(LiveConfig {
            url,
            handshake_timeout,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_connect_sends_setup_and_reads_events() {
        let audio = BASE64_STANDARD.encode([5u8; 16]);
        let script = vec![Message::Text(
            json!({"serverContent": {"modelTurn": {"parts": [{"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": audio}}]}}})
                .to_string()
                .into(),
        )];
        let (url, mut frames) = spawn_upstream(script, true).await;

        let upstream = connector(url, Some(Duration::from_secs(5)))
            .connect(UpstreamSetup {
                session_id: "s1".to_string(),
                instructions: "hello".to_string(),
                tools: vec![],
            })
            .await
            .unwrap();

        let setup = frames.recv().await.unwrap();
        assert_eq!(setup["setup"]["systemInstruction"]["parts"][0]["text"], "hello");

        assert_eq!(
            upstream.read_event().await.unwrap(),
            UpstreamEvent::HandshakeAck
        );
        assert_eq!(
            upstream.read_event().await.unwrap(),
            UpstreamEvent::AudioChunk(Bytes::from(vec![5u8; 16]))
        );
    }

    #[tokio::test]
    async fn test_output_rate_mismatch_is_flagged() {
        let audio = BASE64_STANDARD.encode([0u8; 8]);
        let part = |rate: u32| {
            Message::Text(
                json!({"serverContent": {"modelTurn": {"parts": [{"inlineData": {"mimeType": format!("audio/pcm;rate={rate}"), "data": audio}}]}}})
                    .to_string()
                    .into(),
            )
        };
        let (url, _frames) = spawn_upstream(vec![part(24000), part(16000)], false).await;
        let upstream = LiveConnector::new(LiveConfig {
            url,
            output_sample_rate: 24000,
            ..Default::default()
        })
        .connect_live(UpstreamSetup::default())
        .await
        .unwrap();

        upstream.read_event().await.unwrap();
        assert!(!upstream.rate_warned.load(Ordering::Relaxed));

        // Mismatched audio is still delivered.
        assert_eq!(
            upstream.read_event().await.unwrap(),
            UpstreamEvent::AudioChunk(Bytes::from(vec![0u8; 8]))
        );
        assert!(upstream.rate_warned.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn test_outbound_operations_reach_upstream() {
        let (url, mut frames) = spawn_upstream(vec![], false).await;
        let upstream = connector(url, None)
            .connect(UpstreamSetup::default())
            .await
            .unwrap();
        let _setup = frames.recv().await.unwrap();

        upstream
            .send_audio(Bytes::from_static(&[1, 0, 2, 0]))
            .await
            .unwrap();
        upstream.send_text("hi").await.unwrap();

        let audio = frames.recv().await.unwrap();
        assert_eq!(
            audio["realtimeInput"]["mediaChunks"][0]["mimeType"],
            "audio/pcm;rate=16000"
        );
        let text = frames.recv().await.unwrap();
        assert_eq!(text["clientContent"]["turns"][0]["parts"][0]["text"], "hi");
    }

    #[tokio::test]
    async fn test_unparseable_message_is_skipped() {
        let script = vec![
            Message::Text("{not json".to_string().into()),
            Message::Binary(Bytes::from_static(b"{\"serverContent\":{\"turnComplete\":true}}")),
        ];
        let (url, _frames) = spawn_upstream(script, false).await;
        let upstream = connector(url, None)
            .connect(UpstreamSetup::default())
            .await
            .unwrap();

        assert_eq!(
            upstream.read_event().await.unwrap(),
            UpstreamEvent::TurnComplete
        );
    }

    #[tokio::test]
    async fn test_remote_close_is_fatal() {
        let (url, _frames) = spawn_upstream(vec![Message::Close(None)], false).await;
        let upstream = connector(url, None)
            .connect(UpstreamSetup::default())
            .await
            .unwrap();

        assert!(matches!(
            upstream.read_event().await,
            Err(UpstreamError::Closed)
        ));
        assert!(!upstream.is_open());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_blocks_sends() {
        let (url, _frames) = spawn_upstream(vec![], false).await;
        let upstream = connector(url, None)
            .connect(UpstreamSetup::default())
            .await
            .unwrap();

        upstream.close().await.unwrap();
        upstream.close().await.unwrap();
        assert!(matches!(
            upstream.send_text("late").await,
            Err(UpstreamError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let (url, _frames) = spawn_upstream(vec![], false).await;
        let result = connector(url, Some(Duration::from_millis(100)))
            .connect(UpstreamSetup::default())
            .await;
        assert!(matches!(result, Err(UpstreamError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = connector(format!("ws://{addr}"), None)
            .connect(UpstreamSetup::default())
            .await;
        assert!(matches!(result, Err(UpstreamError::ConnectionFailed(_))));
    }
}
