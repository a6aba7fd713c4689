//! Error taxonomy for the orchestration core.
//!
//! The scheduler never lets one of these escape its boundary: every variant
//! ends up either in the session status (paused/failed) or in the message
//! log. Handlers map them onto HTTP status codes at the API edge.

use crate::llm::ProviderError;

/// Errors that can occur in orchestration operations.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Missing or unauthorized team/agent/session. Surfaced immediately,
    /// never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// No usable credential for the agent's provider. Critical: terminates
    /// the session.
    #[error("Credential error: {0}")]
    Credential(String),

    /// Rate limit denial from the guard. Pauses (not fails) the session so
    /// an operator can raise limits and resume.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Budget denial from the guard. Pauses the session.
    #[error("Budget exceeded: {0}")]
    Budget(String),

    /// Provider-side failure, classified by its structured kind.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Malformed tool-action block. Logged and treated as "no actions
    /// requested" by callers.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Storage backend failure.
    #[error("Store error: {0}")]
    Store(String),
}

impl OrchestratorError {
    /// Whether this error should pause the session rather than fail it.
    pub fn pauses_session(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Budget(_))
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
