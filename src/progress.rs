//! Abstract progress events.
//!
//! The core announces what a session is doing; delivery to clients is the
//! surrounding system's concern. Emission is fire-and-forget: a failure to
//! deliver never fails the operation that emitted.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Phase of session progress an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    SessionStarted,
    IterationStarted,
    AgentStarted,
    AgentFinished,
    ToolActions,
    SessionPaused,
    SessionResumed,
    SessionCompleted,
    SessionFailed,
    Fallback,
}

/// A progress event for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<Uuid>,
    pub session_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    pub text: String,
    pub phase: ProgressPhase,
    pub timestamp: String,
}

/// Progress sink consumed by the scheduler.
pub trait Progress: Send + Sync {
    /// Emit an event. Must never block for long and must never fail the
    /// caller; implementations swallow their own delivery errors.
    fn emit(&self, event: ProgressEvent);
}

/// Broadcast-channel hub: every subscriber gets every event, slow
/// subscribers lose old events rather than applying backpressure.
pub struct ProgressHub {
    sender: broadcast::Sender<ProgressEvent>,
}

impl ProgressHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Progress for ProgressHub {
    fn emit(&self, event: ProgressEvent) {
        tracing::debug!(
            session = %event.session_id,
            phase = ?event.phase,
            "{}",
            event.text
        );
        // send() errs only when there are no subscribers; that is fine.
        let _ = self.sender.send(event);
    }
}
