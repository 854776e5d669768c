//! Shared test helpers: a scripted streaming provider and stub tools.

use async_trait::async_trait;
use orbit_core::error::{ProviderError, ToolError};
use orbit_core::event::LoopEvent;
use orbit_core::provider::{
    ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage,
};
use orbit_core::tool::{Arguments, Tool, ToolContext, ToolOutput};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// One scripted model response.
pub enum Script {
    /// Deliver these fragments, then end the feed.
    Turn(Vec<StreamChunk>),
    /// Deliver these fragments and keep the feed open until the receiver
    /// goes away.
    Hold(Vec<StreamChunk>),
    /// Refuse the request.
    Fail(ProviderError),
}

/// A provider that replays scripted fragment feeds, one per request.
///
/// Panics if more requests are made than scripts provided.
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::NotConfigured(
            "scripted provider only streams".into(),
        ))
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .expect("ScriptedProvider: no more scripted turns");

        match script {
            Script::Fail(err) => Err(err),
            Script::Turn(chunks) => {
                let (tx, rx) = tokio::sync::mpsc::channel(chunks.len().max(1));
                for chunk in chunks {
                    tx.try_send(Ok(chunk)).unwrap();
                }
                Ok(rx)
            }
            Script::Hold(chunks) => {
                let (tx, rx) = tokio::sync::mpsc::channel(chunks.len() + 1);
                for chunk in chunks {
                    tx.try_send(Ok(chunk)).unwrap();
                }
                tokio::spawn(async move { tx.closed().await });
                Ok(rx)
            }
        }
    }
}

/// A plain answer: one content fragment and `stop`.
pub fn text_turn(text: &str) -> Script {
    Script::Turn(vec![StreamChunk::content(text), StreamChunk::finish("stop")])
}

/// Tool calls `(id, name, arguments)` in index order, finished with `tool_calls`.
pub fn tool_turn(calls: &[(&str, &str, &str)]) -> Script {
    Script::Turn(tool_chunks(calls, "tool_calls", None))
}

pub fn tool_chunks(
    calls: &[(&str, &str, &str)],
    reason: &str,
    usage: Option<Usage>,
) -> Vec<StreamChunk> {
    let mut chunks: Vec<StreamChunk> = calls
        .iter()
        .enumerate()
        .map(|(index, (id, name, arguments))| StreamChunk::ToolCallDelta {
            index: index as u32,
            id: Some(id.to_string()),
            name: Some(name.to_string()),
            arguments: Some(arguments.to_string()),
        })
        .collect();
    chunks.push(StreamChunk::Finish {
        reason: Some(reason.to_string()),
        usage,
    });
    chunks
}

pub fn usage(prompt: u32, completion: u32) -> Usage {
    Usage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: prompt + completion,
    }
}

/// A tool with no required arguments that answers after `delay`.
pub struct StubTool {
    pub name: &'static str,
    pub output: &'static str,
    pub delay: Duration,
}

impl StubTool {
    pub fn new(name: &'static str, output: &'static str) -> Self {
        Self {
            name,
            output,
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Tool for StubTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "Stub tool for tests"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "path": { "type": "string" } }
        })
    }

    async fn execute(&self, _arguments: Arguments, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(ToolOutput::ok(self.output))
    }
}

/// Everything published on the bus so far.
pub fn drain(rx: &mut broadcast::Receiver<Arc<LoopEvent>>) -> Vec<LoopEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push((*event).clone());
    }
    events
}
