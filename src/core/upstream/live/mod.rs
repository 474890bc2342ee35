//! Live streaming upstream.
//!
//! - Endpoint: configurable `ws://` or `wss://` URL, API key passed as `?key=`
//! - Protocol: WebSocket with single-key JSON messages
//! - Audio: PCM 16-bit mono little-endian, base64 encoded; 16 kHz in, 24 kHz out

mod client;
mod config;
pub mod messages;

pub use client::{LiveConnector, LiveUpstream};
pub use config::{DEFAULT_LIVE_MODEL, DEFAULT_LIVE_URL, DEFAULT_LIVE_VOICE, LiveConfig};
