pub mod audio;
pub mod collaborators;
pub mod peers;
pub mod session;
pub mod tools;
pub mod upstream;

// Re-export commonly used types for convenience
pub use audio::{AudioFrameError, OutboundAudioBuffer, validate_frame};
pub use collaborators::{
    CollaboratorError, Collaborators, Identity, IdentityResolver, InsightSource,
    InstructionBuilder,
};
pub use peers::{ClientLink, PeerRegistry, RelayOutcome};
pub use session::{CloseReason, PendingInsight, Session, SessionManager, SessionSettings};
pub use tools::{Tool, ToolContext, ToolDispatcher, ToolError, ToolRegistry};
pub use upstream::{
    LiveConnector, ToolCall, ToolResult, UpstreamAdapter, UpstreamConnector, UpstreamError,
    UpstreamEvent,
};
