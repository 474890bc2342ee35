//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check and relay statistics
//! - `relay` - Client WebSocket carrying control messages and PCM16 audio

pub mod api;
pub mod relay;

pub use relay::relay_handler;
