//! # orbit Core
//!
//! Domain types, traits, and error definitions for the orbit
//! turn-orchestration engine. This crate has no I/O of its own: it defines
//! the domain model the provider, tool, and agent crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator of the loop is defined as a trait here. Implementations
//! live in their respective crates. This enables:
//! - Swapping the model backend via configuration
//! - Easy testing with scripted providers and stub tools
//! - Clean dependency graph (all crates depend inward on core)

pub mod agent;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::{FailureReason, LoopSettings, LoopState};
pub use error::{Error, ProviderError, RegistryError, Result, ToolError};
pub use event::{EventBus, LoopEvent};
pub use message::{Conversation, ConversationId, Message, MessageToolCall, Role};
pub use provider::{
    ChunkReceiver, FinishReason, Provider, ProviderRequest, ProviderResponse, StreamChunk,
    ToolDefinition, Usage,
};
pub use tool::{
    Arguments, Tool, ToolCall, ToolContext, ToolOutput, ToolRegistry, ToolResult,
};
