//! Orchestration loop settings and state types.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default cap on tool-dispatch round trips per user submission.
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// Default per-call tool time budget.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Generation and safeguard parameters consumed by the loop.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    /// Model identifier sent with every request
    pub model: String,

    /// Sampling temperature
    pub temperature: f32,

    /// Maximum output tokens per model request
    pub max_tokens: Option<u32>,

    /// Routing / preference hint for the backend
    pub route: Option<String>,

    /// Maximum tool-dispatch round trips per submission
    pub max_iterations: u32,

    /// Default time budget for a single tool call
    pub tool_timeout: Duration,

    /// Upper bound on concurrently running tool calls (`None` = unbounded)
    pub max_parallel_tools: Option<usize>,
}

impl LoopSettings {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            model: String::new(),
            temperature: 0.0,
            max_tokens: None,
            route: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            max_parallel_tools: None,
        }
    }
}

/// Why a submission ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// The safeguard limit on tool round trips was hit.
    IterationLimitExceeded { max: u32 },
    /// Network or authentication failure talking to the backend.
    Transport(String),
    /// Stream data that could not be closed out as a turn.
    Protocol(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IterationLimitExceeded { max } => {
                write!(f, "maximum of {max} tool-call iterations reached")
            }
            Self::Transport(detail) => write!(f, "transport error: {detail}"),
            Self::Protocol(detail) => write!(f, "protocol error: {detail}"),
        }
    }
}

/// Runtime state of the orchestration loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum LoopState {
    /// Ready for `submit()`
    #[default]
    Idle,
    /// Request sent, nothing received yet
    AwaitingModel,
    /// Fragments are arriving
    StreamingResponse,
    /// Tool calls of the current turn are executing
    DispatchingTools,
    /// The submission produced a final answer
    Done,
    /// The submission stopped without a final answer
    Failed(FailureReason),
}

impl LoopState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed(_))
    }
}
