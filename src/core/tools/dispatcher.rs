use std::sync::{Arc, Weak};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::isolation::catch_tool_panic;
use super::registry::{ToolContext, ToolRegistry};
use super::ToolError;
use crate::core::upstream::{ToolCall, ToolResult, UpstreamAdapter};

/// Default per-call execution limit.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs upstream tool calls against the capability table.
#[derive(Clone, Debug)]
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Look up and run one tool with panic isolation and the configured timeout.
    pub async fn execute(
        &self,
        call: &ToolCall,
        ctx: ToolContext,
    ) -> Result<Map<String, Value>, ToolError> {
        let tool = self
            .registry
            .get(&call.name)
            .ok_or_else(|| ToolError::UnknownTool(call.name.clone()))?;

        let invocation = catch_tool_panic(tool.invoke(ctx, call.args.clone()));
        match tokio::time::timeout(self.timeout, invocation).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::TimedOut(self.timeout)),
        }
    }

    /// Execute and fold the outcome into a [`ToolResult`] for the upstream.
    pub async fn run(&self, call: &ToolCall, ctx: ToolContext) -> ToolResult {
        match self.execute(call, ctx).await {
            Ok(result) => {
                debug!(tool = %call.name, call_id = %call.call_id, "Tool call succeeded");
                ToolResult::success(call, result)
            }
            Err(e) => {
                warn!(tool = %call.name, call_id = %call.call_id, "Tool call failed: {}", e);
                ToolResult::failure(call, e.to_string())
            }
        }
    }

    /// Run `call` on its own task and send the result upstream when done.
    ///
    /// Only a weak handle to the upstream is kept: if the session is gone by
    /// the time the tool finishes, the result is dropped.
    pub fn dispatch(
        &self,
        call: ToolCall,
        ctx: ToolContext,
        upstream: Weak<dyn UpstreamAdapter>,
    ) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            let session_id = ctx.session_id.clone();
            let result = dispatcher.run(&call, ctx).await;

            let Some(upstream) = upstream.upgrade() else {
                info!(
                    session_id = %session_id,
                    call_id = %call.call_id,
                    "Session ended before tool result was ready, discarding"
                );
                return;
            };
            if let Err(e) = upstream.send_tool_result(result).await {
                info!(
                    session_id = %session_id,
                    call_id = %call.call_id,
                    "Discarding tool result: {}", e
                );
            }
        })
    }
}
