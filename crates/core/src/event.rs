//! Lifecycle events: what the loop tells its observers.
//!
//! Renderers subscribe here instead of sharing buffers with the loop.
//! Events are notifications only; dropping them never affects a turn.

use crate::agent::{FailureReason, LoopState};
use crate::provider::Usage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Events emitted by the orchestration loop during a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    /// Partial answer text.
    ContentDelta { text: String },

    /// Partial reasoning text.
    ReasoningDelta { text: String },

    /// A tool call began executing.
    ToolStarted {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },

    /// A tool call produced its result.
    ToolFinished {
        id: String,
        name: String,
        output: String,
        success: bool,
    },

    /// The submission produced its final answer. Emitted exactly once.
    TurnComplete {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },

    /// The submission stopped without a final answer.
    Failed { reason: FailureReason, message: String },

    /// The submission was cancelled by the caller.
    Cancelled,

    /// The loop moved between states.
    StateChanged { from: LoopState, to: LoopState },
}

impl LoopEvent {
    /// Short event name, e.g. for SSE or log fields.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ContentDelta { .. } => "content-delta",
            Self::ReasoningDelta { .. } => "reasoning-delta",
            Self::ToolStarted { .. } => "tool-started",
            Self::ToolFinished { .. } => "tool-finished",
            Self::TurnComplete { .. } => "turn-complete",
            Self::Failed { .. } => "failed",
            Self::Cancelled => "cancelled",
            Self::StateChanged { .. } => "state-changed",
        }
    }
}

/// A broadcast-based event bus for lifecycle events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. A slow
/// subscriber lags and skips; it never blocks the loop.
pub struct EventBus {
    sender: broadcast::Sender<Arc<LoopEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: LoopEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<LoopEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
