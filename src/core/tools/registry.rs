use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::ToolError;
use crate::core::upstream::ToolDeclaration;

/// Context handed to every tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolContext {
    pub subject_id: String,
    pub session_id: String,
    pub call_id: String,
}

/// A callable capability the upstream model may invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name, description and parameter schema advertised to the upstream.
    fn declaration(&self) -> ToolDeclaration;

    async fn invoke(
        &self,
        ctx: ToolContext,
        args: Map<String, Value>,
    ) -> Result<Map<String, Value>, ToolError>;
}

/// Name → tool lookup table. Built once at startup, read-only afterwards.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its declared name; a later registration wins.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.declaration().name;
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "Replacing previously registered tool");
        }
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Declarations sorted by name, for a stable setup message.
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        let mut declarations: Vec<_> = self.tools.values().map(|t| t.declaration()).collect();
        declarations.sort_by(|a, b| a.name.cmp(&b.name));
        declarations
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.tools.keys().collect();
        names.sort();
        f.debug_struct("ToolRegistry").field("tools", &names).finish()
    }
}
