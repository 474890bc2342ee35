//! Tool execution for upstream function calls.
//!
//! The capability table ([`ToolRegistry`]) is supplied from outside; the
//! relay only looks tools up by name, runs them with panic isolation and a
//! timeout, and returns the outcome to the upstream keyed by call ID.

mod dispatcher;
mod isolation;
mod registry;

pub use dispatcher::ToolDispatcher;
pub use isolation::catch_tool_panic;
pub use registry::{Tool, ToolContext, ToolRegistry};

use std::time::Duration;
use thiserror::Error;

/// Errors from a single tool invocation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ToolError {
    /// No tool with this name in the capability table
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Tool returned an error
    #[error("Tool failed: {0}")]
    Failed(String),

    /// Tool panicked
    #[error("Tool panicked: {0}")]
    Panicked(String),

    /// Tool did not finish in time
    #[error("Tool timed out after {0:?}")]
    TimedOut(Duration),
}
