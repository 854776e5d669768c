//! Provider trait: the abstraction over the model backend.
//!
//! A Provider knows how to send a conversation to an LLM and get a response
//! back, either as a complete message or as an incremental feed of
//! [`StreamChunk`] fragments that the agent's stream decoder reassembles.

use crate::error::ProviderError;
use crate::message::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "anthropic/claude-haiku-4.5")
    pub model: String,

    /// The conversation messages, system prompt first
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic)
    #[serde(default)]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Available tools the model can call, in registry order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Routing / preference hint forwarded to the backend (e.g. "throughput")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,

    /// Whether to stream the response
    #[serde(default)]
    pub stream: bool,
}

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// A complete (non-streaming) response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated message
    pub message: Message,

    /// Why generation stopped, as reported by the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    /// Add another request's usage to this running total.
    pub fn accumulate(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Backend-supplied terminal signal for a streamed response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    Error,
}

impl FinishReason {
    /// Parse a wire finish reason. Unknown values yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "stop" | "end_turn" => Some(Self::Stop),
            "tool_calls" | "function_call" | "tool_use" => Some(Self::ToolCalls),
            "length" | "max_tokens" => Some(Self::Length),
            "error" | "content_filter" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::ToolCalls => "tool_calls",
            Self::Length => "length",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One raw fragment of an incrementally delivered model response.
///
/// Providers translate their wire format into this shape; nothing here is
/// validated yet. Ordering and completeness are the decoder's concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    /// Visible answer text.
    Content { text: String },

    /// Extended-thinking text, displayed but never replayed to the model.
    Reasoning { text: String },

    /// Part of a tool call. `id` and `name` usually arrive only on the first
    /// fragment for an index; `arguments` arrives in pieces.
    ToolCallDelta {
        index: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        arguments: Option<String>,
    },

    /// End of arguments for the tool call at `index`.
    ToolCallEnd { index: u32 },

    /// Stream data the provider could not interpret. The turn keeps going
    /// but cannot be trusted to be complete.
    Malformed { detail: String },

    /// Terminal fragment. `reason` is the raw wire value, if any.
    Finish {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
}

impl StreamChunk {
    pub fn content(text: impl Into<String>) -> Self {
        Self::Content { text: text.into() }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self::Reasoning { text: text.into() }
    }

    pub fn finish(reason: impl Into<String>) -> Self {
        Self::Finish {
            reason: Some(reason.into()),
            usage: None,
        }
    }
}

/// Receiving half of a streamed response.
pub type ChunkReceiver =
    tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>;

/// The core Provider trait.
///
/// The loop only ever calls `stream()`; `complete()` exists for one-shot
/// callers and backs the default streaming implementation.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openrouter").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Send a request and get a feed of response fragments.
    ///
    /// Default implementation calls `complete()` and replays the result as
    /// the fragment sequence a streaming backend would have produced.
    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let response = self.complete(request).await?;
        let chunks = response_to_chunks(response);
        let (tx, rx) = tokio::sync::mpsc::channel(chunks.len().max(1));
        for chunk in chunks {
            let _ = tx.send(Ok(chunk)).await;
        }
        Ok(rx)
    }
}

/// Expand a complete response into the equivalent fragment sequence.
pub fn response_to_chunks(response: ProviderResponse) -> Vec<StreamChunk> {
    let mut chunks = Vec::new();
    let message = response.message;

    if !message.content.is_empty() {
        chunks.push(StreamChunk::content(message.content));
    }

    let has_tools = !message.tool_calls.is_empty();
    for (index, tc) in message.tool_calls.into_iter().enumerate() {
        let index = index as u32;
        chunks.push(StreamChunk::ToolCallDelta {
            index,
            id: Some(tc.id),
            name: Some(tc.name),
            arguments: Some(tc.arguments),
        });
        chunks.push(StreamChunk::ToolCallEnd { index });
    }

    let reason = response.finish_reason.unwrap_or_else(|| {
        if has_tools {
            FinishReason::ToolCalls.as_str().to_string()
        } else {
            FinishReason::Stop.as_str().to_string()
        }
    });
    chunks.push(StreamChunk::Finish {
        reason: Some(reason),
        usage: response.usage,
    });
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageToolCall;

    #[test]
    fn finish_reason_parsing() {
        assert_eq!(FinishReason::parse("stop"), Some(FinishReason::Stop));
        assert_eq!(
            FinishReason::parse("tool_calls"),
            Some(FinishReason::ToolCalls)
        );
        assert_eq!(FinishReason::parse("length"), Some(FinishReason::Length));
        assert_eq!(FinishReason::parse("error"), Some(FinishReason::Error));
        assert_eq!(FinishReason::parse("banana"), None);
    }

    #[test]
    fn tool_definition_serialization() {
        let tool = ToolDefinition {
            name: "execute_command".into(),
            description: "Execute a shell command".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "The command to run" }
                },
                "required": ["command"]
            }),
        };
        let json = serde_json::to_string(&tool).unwrap();
        assert!(json.contains("execute_command"));
        assert!(json.contains("command"));
    }

    #[test]
    fn usage_accumulates() {
        let mut total = Usage::default();
        total.accumulate(&Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        });
        total.accumulate(&Usage {
            prompt_tokens: 1,
            completion_tokens: 2,
            total_tokens: 3,
        });
        assert_eq!(total.total_tokens, 18);
        assert_eq!(total.prompt_tokens, 11);
    }

    #[test]
    fn complete_response_replays_as_fragments() {
        let message = Message::assistant_with_tools(
            "checking",
            vec![MessageToolCall {
                id: "call_1".into(),
                name: "list_dir".into(),
                arguments: r#"{"path":"."}"#.into(),
            }],
        );
        let chunks = response_to_chunks(ProviderResponse {
            message,
            finish_reason: None,
            usage: None,
            model: "mock".into(),
        });

        assert_eq!(chunks[0], StreamChunk::content("checking"));
        assert!(matches!(
            chunks[1],
            StreamChunk::ToolCallDelta { index: 0, .. }
        ));
        assert_eq!(chunks[2], StreamChunk::ToolCallEnd { index: 0 });
        assert_eq!(
            chunks[3],
            StreamChunk::Finish {
                reason: Some("tool_calls".into()),
                usage: None
            }
        );
    }

    #[test]
    fn chunk_serialization_is_tagged() {
        let json = serde_json::to_string(&StreamChunk::ToolCallEnd { index: 2 }).unwrap();
        assert_eq!(json, r#"{"type":"tool_call_end","index":2}"#);
    }
}
