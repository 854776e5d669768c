//! Tool trait: the abstraction over agent capabilities.
//!
//! Tools are what give the agent the ability to act in the world:
//! execute shell commands, read/write files, list directories, etc.
//! The registry is a fixed capability table addressed by name; every entry
//! is polymorphic over one `execute(args) → output-or-error` capability.

use crate::error::{RegistryError, ToolError};
use crate::message::MessageToolCall;
use crate::provider::ToolDefinition;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Keyed argument mapping handed to a tool executor.
pub type Arguments = serde_json::Map<String, serde_json::Value>;

/// A model-issued request to invoke a named tool.
///
/// Arguments are parsed exactly once, when the decoder sees the end of the
/// argument stream. A parse failure is kept here and reported to the model
/// through the matching [`ToolResult`].
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    /// Unique call ID within the owning turn (matches the LLM's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Argument text accumulated across stream fragments
    pub raw_arguments: String,

    /// Parsed arguments, or a description of why parsing failed
    pub arguments: std::result::Result<Arguments, String>,
}

impl ToolCall {
    /// Build a completed call, parsing `raw_arguments`.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        raw_arguments: impl Into<String>,
    ) -> Self {
        let raw_arguments = raw_arguments.into();
        let arguments = parse_arguments(&raw_arguments);
        Self {
            id: id.into(),
            name: name.into(),
            raw_arguments,
            arguments,
        }
    }

    /// The form stored on the assistant message in history.
    pub fn to_message_call(&self) -> MessageToolCall {
        MessageToolCall {
            id: self.id.clone(),
            name: self.name.clone(),
            arguments: self.raw_arguments.clone(),
        }
    }

    /// Arguments as a JSON value for display, `Null` when unparseable.
    pub fn arguments_value(&self) -> serde_json::Value {
        match &self.arguments {
            Ok(map) => serde_json::Value::Object(map.clone()),
            Err(_) => serde_json::Value::Null,
        }
    }
}

/// Parse streamed argument text into a keyed mapping.
///
/// Blank text is treated as "no arguments"; anything that is not a JSON
/// object is rejected.
pub fn parse_arguments(raw: &str) -> std::result::Result<Arguments, String> {
    if raw.trim().is_empty() {
        return Ok(Arguments::new());
    }
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        )),
        Err(e) => Err(format!("malformed JSON ({e})")),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Names listed under the schema's `required` key that `args` lacks.
pub fn missing_required(schema: &serde_json::Value, args: &Arguments) -> Vec<String> {
    schema["required"]
        .as_array()
        .map(|required| {
            required
                .iter()
                .filter_map(|r| r.as_str())
                .filter(|name| !args.contains_key(*name))
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// What a tool executor hands back on a normal return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Whether the operation itself succeeded
    pub success: bool,

    /// Text delivered to the model
    pub content: String,
}

impl ToolOutput {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
        }
    }

    /// A handled failure the tool wants to describe in its own words.
    pub fn failed(content: impl Into<String>) -> Self {
        Self {
            success: false,
            content: content.into(),
        }
    }
}

/// The result of a tool execution, always deliverable to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// Whether the tool executed successfully
    pub success: bool,

    /// The output content, or an `Error: ...` description
    pub output: String,

    /// When the result was produced
    pub completed_at: DateTime<Utc>,
}

impl ToolResult {
    pub fn from_output(call_id: impl Into<String>, output: ToolOutput) -> Self {
        Self {
            call_id: call_id.into(),
            success: output.success,
            output: output.content,
            completed_at: Utc::now(),
        }
    }

    /// Render a contained failure as tool output.
    pub fn from_error(call_id: impl Into<String>, error: &ToolError) -> Self {
        Self {
            call_id: call_id.into(),
            success: false,
            output: format!("Error: {error}"),
            completed_at: Utc::now(),
        }
    }

    pub fn is_error(&self) -> bool {
        !self.success
    }
}

/// Per-invocation context passed to an executor.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// The call being served
    pub call_id: String,

    /// Fires on timeout or external cancellation. Process-backed tools must
    /// terminate their child when this fires.
    pub cancellation: CancellationToken,
}

impl ToolContext {
    pub fn new(call_id: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            cancellation: CancellationToken::new(),
        }
    }
}

/// The core Tool trait.
///
/// Each tool (execute_command, read_file, write_file, ...) implements this
/// trait. Tools are registered in the ToolRegistry and made available to the
/// orchestration loop.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "execute_command", "read_file").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        arguments: Arguments,
        ctx: &ToolContext,
    ) -> std::result::Result<ToolOutput, ToolError>;

    /// Time budget override; `None` uses the dispatcher default.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools, enumerated in insertion order.
///
/// Registration happens once at startup; the loop holds it behind an `Arc`
/// and never mutates it afterwards.
pub struct ToolRegistry {
    tools: IndexMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: IndexMap::new(),
        }
    }

    /// Register a tool. Fails if the name is already taken.
    pub fn register(&mut self, tool: Box<dyn Tool>) -> std::result::Result<(), RegistryError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(RegistryError::DuplicateTool(name));
        }
        tracing::debug!(tool = %name, "Registered tool");
        self.tools.insert(name, Arc::from(tool));
        Ok(())
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Get a shareable handle to a tool, or `NotFound`.
    pub fn lookup(&self, name: &str) -> std::result::Result<Arc<dyn Tool>, ToolError> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }

    /// Get all tool definitions (for sending to the LLM), in insertion order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    /// List all registered tool names, in insertion order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
