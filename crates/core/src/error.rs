//! Error types for the orbit domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant. Only configuration,
//! transport, and unrecoverable protocol errors ever stop the loop; tool and
//! argument errors are turned into tool output at the dispatcher boundary.

use std::time::Duration;
use thiserror::Error;

/// The top-level error type for all orbit operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Setup ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Model backend ---
    #[error("Transport error: {0}")]
    Transport(#[from] ProviderError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    // --- Tools ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    // --- Loop lifecycle ---
    #[error("A turn is already in flight; submit() is only accepted while idle")]
    Busy,

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures talking to the model backend.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Failures of a single tool invocation. These never leave the dispatcher
/// as errors; they are rendered into the `ToolResult` the model sees.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout:?}")]
    Timeout { tool_name: String, timeout: Duration },

    #[error("Permission denied: {tool_name}: {reason}")]
    PermissionDenied { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool execution cancelled: {0}")]
    Cancelled(String),
}

/// Errors raised while building the tool table.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("A tool named '{0}' is already registered")]
    DuplicateTool(String),
}
