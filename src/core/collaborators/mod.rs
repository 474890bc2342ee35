//! External collaborators consumed by the relay.
//!
//! Identity resolution, instruction assembly, insight computation and the
//! tool capability table all live outside this service. The relay only sees
//! them through the traits below, with a static implementation for
//! standalone deployments and an HTTP-backed one when a collaborator service
//! URL is configured.

mod http;
mod local;

pub use http::{HttpCollaborator, RemoteTool};
pub use local::{PassthroughIdentity, StaticInstructions};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::ServerConfig;
use crate::core::tools::ToolRegistry;

/// Errors returned by collaborator calls.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CollaboratorError {
    /// The requested identity or subject does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The collaborator could not be reached or answered with a failure status
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),

    /// The collaborator answered with a body we could not understand
    #[error("Invalid collaborator response: {0}")]
    InvalidResponse(String),
}

/// A resolved internal identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub subject_id: String,
    #[serde(default)]
    pub display_attrs: Map<String, Value>,
}

/// Maps an external client identifier to an internal subject.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, external_id: &str) -> Result<Identity, CollaboratorError>;
}

/// Produces the instruction text sent in the upstream setup.
#[async_trait]
pub trait InstructionBuilder: Send + Sync {
    async fn build(&self, subject_id: &str) -> Result<String, CollaboratorError>;
}

/// Computes optional context to inject into a live session from a user
/// transcript. `Ok(None)` means nothing worth injecting.
#[async_trait]
pub trait InsightSource: Send + Sync {
    async fn insight(
        &self,
        subject_id: &str,
        transcript: &str,
    ) -> Result<Option<String>, CollaboratorError>;
}

/// Bundle of collaborators shared by every connection.
#[derive(Clone)]
pub struct Collaborators {
    pub identity: Arc<dyn IdentityResolver>,
    pub instructions: Arc<dyn InstructionBuilder>,
    pub insights: Option<Arc<dyn InsightSource>>,
    pub tools: Arc<ToolRegistry>,
}

impl Collaborators {
    /// Standalone collaborators: identity passthrough, fixed instructions,
    /// no insights and no tools.
    pub fn standalone(default_instructions: impl Into<String>) -> Self {
        Self {
            identity: Arc::new(PassthroughIdentity),
            instructions: Arc::new(StaticInstructions::new(default_instructions)),
            insights: None,
            tools: Arc::new(ToolRegistry::new()),
        }
    }

    /// Build the collaborator set described by the configuration.
    pub fn from_config(config: &ServerConfig) -> Result<Self, CollaboratorError> {
        let Some(base_url) = config.collaborators.service_url.as_deref() else {
            return Ok(Self::standalone(config.upstream.default_instructions.clone()));
        };

        let http = Arc::new(HttpCollaborator::new(
            base_url,
            Duration::from_secs(config.collaborators.timeout_seconds),
        )?);

        let mut tools = ToolRegistry::new();
        for declaration in &config.collaborators.tools {
            tools.register(Arc::new(RemoteTool::new(http.clone(), declaration.clone())));
        }

        tracing::info!(
            service_url = %base_url,
            tools = tools.len(),
            "Using HTTP collaborators"
        );

        Ok(Self {
            identity: http.clone(),
            instructions: http.clone(),
            insights: Some(http),
            tools: Arc::new(tools),
        })
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("insights", &self.insights.is_some())
            .field("tools", &self.tools)
            .finish()
    }
}
