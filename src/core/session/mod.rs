//! Sessions and their lifecycle.
//!
//! A [`Session`] pairs one client connection with one upstream connection.
//! The [`SessionManager`] creates sessions after a successful upstream
//! handshake, runs the upstream→client loop for each, and funnels every
//! teardown (hangup, disconnect, upstream failure, idle reaping, shutdown)
//! through the same idempotent close.

mod base;
mod insight;
mod manager;

pub use base::{CloseReason, Session};
pub use insight::PendingInsight;
pub use manager::{SessionManager, SessionRequest, SessionSettings};
