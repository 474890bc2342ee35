//! Panic isolation for tool calls.
//!
//! Tool implementations come from outside the relay. A panic inside one is
//! caught here and turned into [`ToolError::Panicked`] so it is reported
//! like any other failure instead of taking down the session task.
//!
//! `catch_unwind` only catches unwinding panics; builds with
//! `panic = "abort"` lose this protection.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;

use super::ToolError;

/// Await `future`, converting a panic during polling into `ToolError::Panicked`.
pub async fn catch_tool_panic<Fut, T>(future: Fut) -> Result<T, ToolError>
where
    Fut: Future<Output = Result<T, ToolError>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(panic_info) => {
            let msg = extract_panic_message(&panic_info);
            tracing::error!(message = %msg, "Tool panicked");
            Err(ToolError::Panicked(msg))
        }
    }
}

/// Handles the common `&str` and `String` payloads.
fn extract_panic_message(panic_info: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic (non-string payload)".to_string()
    }
}
