//! Upstream realtime-inference connections.
//!
//! Every session owns exactly one [`UpstreamAdapter`], opened through an
//! [`UpstreamConnector`]. The adapter hides the provider wire protocol behind
//! a small set of outbound operations and a pull-based [`UpstreamAdapter::read_event`].
//!
//! The shipped implementation, [`live`], speaks a JSON-over-WebSocket
//! bidirectional streaming protocol (`setup` / `realtimeInput` /
//! `clientContent` / `toolResponse` out, `setupComplete` / `serverContent` /
//! `toolCall` in).

pub mod base;
pub mod live;

#[cfg(test)]
pub(crate) mod mock;

pub use base::{
    ToolCall, ToolDeclaration, ToolOutcome, ToolResult, TranscriptRole, UpstreamAdapter,
    UpstreamConnector, UpstreamError, UpstreamEvent, UpstreamResult, UpstreamSetup,
};
pub use live::{LiveConfig, LiveConnector, LiveUpstream};
