//! OpenAI-compatible provider implementation.
//!
//! Works with: OpenRouter, OpenAI, Ollama, vLLM, and any endpoint exposing
//! `/chat/completions` in the OpenAI shape.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Tool use / function calling
//! - Reasoning deltas (OpenRouter `reasoning` / `reasoning_content`)
//! - Routing hints forwarded as `route`

use crate::sse::SseParser;
use async_trait::async_trait;
use futures::StreamExt;
use orbit_core::error::ProviderError;
use orbit_core::message::{Message, MessageToolCall, Role};
use orbit_core::provider::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// An OpenAI-compatible model backend.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        // No total timeout: a streamed turn may legitimately run for minutes.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Create an OpenRouter provider (convenience constructor).
    pub fn openrouter(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key)
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "system".into(),
                    Role::Tool => "tool".into(),
                },
                content: Some(m.content.clone()),
                tool_calls: if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments.clone(),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: m.tool_call_id.clone(),
            })
            .collect()
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    /// Build the JSON request body shared by both request modes.
    fn request_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": stream,
        });

        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
            body["tool_choice"] = serde_json::json!("auto");
        }

        if let Some(route) = &request.route {
            body["route"] = serde_json::json!(route);
        }

        body
    }

    async fn send(
        &self,
        body: &serde_json::Value,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut builder = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("X-Title", "orbit");
        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        check_status(response).await
    }
}

/// Map non-success HTTP statuses to provider errors.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();

    if status == 429 {
        let retry_after_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(5);
        return Err(ProviderError::RateLimited { retry_after_secs });
    }

    if status == 401 || status == 403 {
        return Err(ProviderError::AuthenticationFailed(
            "Invalid API key or insufficient permissions".into(),
        ));
    }

    if !(200..300).contains(&status) {
        let error_body = response.text().await.unwrap_or_default();
        warn!(status, body = %error_body, "Provider returned error");
        return Err(ProviderError::ApiError {
            status_code: status,
            message: error_body,
        });
    }

    Ok(response)
}

#[async_trait]
impl orbit_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let body = Self::request_body(&request, false);
        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let response = self.send(&body, false).await?;

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        let choice =
            api_response
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| ProviderError::ApiError {
                    status_code: 200,
                    message: "No choices in response".into(),
                })?;

        let tool_calls: Vec<MessageToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| MessageToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();

        let message = Message::assistant_with_tools(
            choice.message.content.unwrap_or_default(),
            tool_calls,
        );

        Ok(ProviderResponse {
            message,
            finish_reason: choice.finish_reason,
            usage: api_response.usage.map(Usage::from),
            model: api_response.model,
        })
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let body = Self::request_body(&request, true);
        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let response = self.send(&body, true).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider_name = self.name.clone();

        // Read the SSE byte stream and translate it into fragments. Dropping
        // the receiver ends the task and with it the HTTP response.
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut parser = SseParser::new();
            let mut translator = ChunkTranslator::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                for event in parser.push(&bytes) {
                    if event.is_done() {
                        for chunk in translator.done() {
                            let _ = tx.send(Ok(chunk)).await;
                        }
                        return;
                    }

                    let chunks = match translator.translate(&event.data) {
                        Ok(chunks) => chunks,
                        Err(err) => {
                            let _ = tx.send(Err(err)).await;
                            return;
                        }
                    };
                    for chunk in chunks {
                        if tx.send(Ok(chunk)).await.is_err() {
                            trace!(provider = %provider_name, "Stream receiver dropped");
                            return;
                        }
                    }
                }
            }

            if let Some(event) = parser.finish() {
                if !event.is_done() {
                    if let Ok(chunks) = translator.translate(&event.data) {
                        for chunk in chunks {
                            let _ = tx.send(Ok(chunk)).await;
                        }
                    }
                }
            }

            // Stream ended without [DONE]: close out only if a finish
            // reason was seen, otherwise leave the turn unterminated.
            for chunk in translator.eof() {
                let _ = tx.send(Ok(chunk)).await;
            }
        });

        Ok(rx)
    }
}

/// Translates OpenAI SSE payloads into [`StreamChunk`] fragments.
///
/// Tool calls are left open until a `finish_reason` arrives, at which point
/// every open index is ended in ascending order. The terminal `Finish` is
/// held back until `[DONE]` so that a trailing usage-only payload can be
/// attached to it.
#[derive(Debug, Default)]
struct ChunkTranslator {
    open: BTreeSet<u32>,
    finish_reason: Option<String>,
    usage: Option<Usage>,
    finished: bool,
}

impl ChunkTranslator {
    fn translate(&mut self, data: &str) -> Result<Vec<StreamChunk>, ProviderError> {
        let payload: StreamResponse = match serde_json::from_str(data) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(data = %data, error = %e, "Unparseable SSE chunk");
                return Ok(vec![StreamChunk::Malformed {
                    detail: format!("unparseable stream payload: {e}"),
                }]);
            }
        };

        if let Some(error) = payload.error {
            return Err(ProviderError::StreamInterrupted(error.message));
        }

        let mut chunks = Vec::new();

        if let Some(choice) = payload.choices.into_iter().next() {
            let delta = choice.delta;

            if let Some(text) = delta.reasoning.filter(|t| !t.is_empty()) {
                chunks.push(StreamChunk::Reasoning { text });
            }
            if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                chunks.push(StreamChunk::Content { text });
            }
            for tc in delta.tool_calls.unwrap_or_default() {
                self.open.insert(tc.index);
                let (name, arguments) = match tc.function {
                    Some(f) => (f.name, f.arguments),
                    None => (None, None),
                };
                chunks.push(StreamChunk::ToolCallDelta {
                    index: tc.index,
                    id: tc.id,
                    name,
                    arguments,
                });
            }

            if let Some(reason) = choice.finish_reason {
                chunks.extend(
                    std::mem::take(&mut self.open)
                        .into_iter()
                        .map(|index| StreamChunk::ToolCallEnd { index }),
                );
                self.finish_reason = Some(reason);
            }
        }

        if let Some(usage) = payload.usage {
            self.usage = Some(usage.into());
        }

        Ok(chunks)
    }

    /// `[DONE]` received.
    fn done(&mut self) -> Vec<StreamChunk> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        vec![StreamChunk::Finish {
            reason: self.finish_reason.take(),
            usage: self.usage.take(),
        }]
    }

    /// Byte stream ended without `[DONE]`.
    fn eof(&mut self) -> Vec<StreamChunk> {
        if self.finish_reason.is_some() {
            self.done()
        } else {
            Vec::new()
        }
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl From<ApiUsage> for Usage {
    fn from(u: ApiUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` payload from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default, alias = "reasoning_content")]
    reasoning: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta; arrives incrementally across payloads.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}
