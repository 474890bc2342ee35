//! Client-facing relay endpoint: control messages and audio over one WebSocket.

mod handler;
pub mod messages;

pub use handler::{ConnectionPhase, relay_handler};
pub use messages::{ClientRoute, IncomingMessage, OutgoingMessage};
