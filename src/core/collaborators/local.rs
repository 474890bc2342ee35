use async_trait::async_trait;

use super::{CollaboratorError, Identity, IdentityResolver, InstructionBuilder};

/// Uses the external client ID as the subject ID.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughIdentity;

#[async_trait]
impl IdentityResolver for PassthroughIdentity {
    async fn resolve(&self, external_id: &str) -> Result<Identity, CollaboratorError> {
        if external_id.trim().is_empty() {
            return Err(CollaboratorError::NotFound(
                "empty client identifier".to_string(),
            ));
        }
        Ok(Identity {
            subject_id: external_id.to_string(),
            display_attrs: Default::default(),
        })
    }
}

/// Returns the same instructions for every subject.
#[derive(Debug, Clone)]
pub struct StaticInstructions {
    instructions: String,
}

impl StaticInstructions {
    pub fn new(instructions: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
        }
    }
}

#[async_trait]
impl InstructionBuilder for StaticInstructions {
    async fn build(&self, _subject_id: &str) -> Result<String, CollaboratorError> {
        Ok(self.instructions.clone())
    }
}
