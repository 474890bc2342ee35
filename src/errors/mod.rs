//! Error types for the control plane.
//!
//! Layer-specific errors live next to their layers (`core::upstream::UpstreamError`,
//! `core::tools::ToolError`, `core::collaborators::CollaboratorError`); this module
//! holds the taxonomy surfaced to clients.

pub mod relay_error;

pub use relay_error::{RelayError, RelayResult};
