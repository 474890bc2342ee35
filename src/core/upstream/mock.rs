//! In-memory upstream used by unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::base::{
    ToolResult, UpstreamAdapter, UpstreamConnector, UpstreamError, UpstreamEvent, UpstreamResult,
    UpstreamSetup,
};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Sent {
    Audio(Bytes),
    Text(String),
    ToolResult(ToolResult),
}

pub(crate) struct MockUpstream {
    events: tokio::sync::Mutex<mpsc::UnboundedReceiver<UpstreamResult<UpstreamEvent>>>,
    feed: mpsc::UnboundedSender<UpstreamResult<UpstreamEvent>>,
    sent: Mutex<Vec<Sent>>,
    sent_notify: tokio::sync::Notify,
    closes: AtomicUsize,
    open: AtomicBool,
    pub(crate) setup: UpstreamSetup,
}

impl MockUpstream {
    pub(crate) fn new(setup: UpstreamSetup) -> Arc<Self> {
        let (feed, events) = mpsc::unbounded_channel();
        Arc::new(Self {
            events: tokio::sync::Mutex::new(events),
            feed,
            sent: Mutex::new(Vec::new()),
            sent_notify: tokio::sync::Notify::new(),
            closes: AtomicUsize::new(0),
            open: AtomicBool::new(true),
            setup,
        })
    }

    /// Queue an event for `read_event`.
    pub(crate) fn emit(&self, event: UpstreamEvent) {
        let _ = self.feed.send(Ok(event));
    }

    /// Make the next `read_event` fail like a dropped transport.
    pub(crate) fn fail(&self, error: UpstreamError) {
        let _ = self.feed.send(Err(error));
    }

    pub(crate) fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub(crate) fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` outbound operations were recorded.
    pub(crate) async fn wait_for_sent(&self, count: usize) -> Vec<Sent> {
        loop {
            let notified = self.sent_notify.notified();
            {
                let sent = self.sent.lock();
                if sent.len() >= count {
                    return sent.clone();
                }
            }
            notified.await;
        }
    }

    fn record(&self, item: Sent) -> UpstreamResult<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(UpstreamError::NotConnected);
        }
        self.sent.lock().push(item);
        self.sent_notify.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl UpstreamAdapter for MockUpstream {
    async fn send_audio(&self, frame: Bytes) -> UpstreamResult<()> {
        self.record(Sent::Audio(frame))
    }

    async fn send_text(&self, text: &str) -> UpstreamResult<()> {
        self.record(Sent::Text(text.to_string()))
    }

    async fn send_tool_result(&self, result: ToolResult) -> UpstreamResult<()> {
        self.record(Sent::ToolResult(result))
    }

    async fn read_event(&self) -> UpstreamResult<UpstreamEvent> {
        match self.events.lock().await.recv().await {
            Some(item) => item,
            None => Err(UpstreamError::Closed),
        }
    }

    async fn close(&self) -> UpstreamResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Connector handing out [`MockUpstream`]s, optionally failing.
#[derive(Default)]
pub(crate) struct MockConnector {
    pub(crate) fail_with: Mutex<Option<String>>,
    pub(crate) opened: Mutex<Vec<Arc<MockUpstream>>>,
    /// Events every new upstream has queued the moment it connects
    greeting: Vec<UpstreamEvent>,
}

impl MockConnector {
    pub(crate) fn failing(message: &str) -> Self {
        Self {
            fail_with: Mutex::new(Some(message.to_string())),
            opened: Mutex::new(Vec::new()),
            greeting: Vec::new(),
        }
    }

    pub(crate) fn with_greeting(greeting: Vec<UpstreamEvent>) -> Self {
        Self {
            greeting,
            ..Self::default()
        }
    }

    pub(crate) fn last(&self) -> Arc<MockUpstream> {
        self.opened
            .lock()
            .last()
            .cloned()
            .expect("no upstream opened")
    }
}

#[async_trait]
impl UpstreamConnector for MockConnector {
    async fn connect(&self, setup: UpstreamSetup) -> UpstreamResult<Arc<dyn UpstreamAdapter>> {
        if let Some(message) = self.fail_with.lock().clone() {
            return Err(UpstreamError::HandshakeFailed(message));
        }
        let upstream = MockUpstream::new(setup);
        for event in &self.greeting {
            upstream.emit(event.clone());
        }
        self.opened.lock().push(upstream.clone());
        Ok(upstream)
    }
}
