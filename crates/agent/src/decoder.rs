//! Stream decoder: reassembles provider fragments into turn events.
//!
//! The decoder is pure. It owns no I/O and never touches history; the loop
//! feeds it [`StreamChunk`]s and acts on the [`StreamEvent`]s it returns.
//!
//! Tool calls are tracked per index so that several calls can stream their
//! arguments interleaved. Arguments are parsed only when the call's index is
//! closed, either by an explicit end fragment or by the terminal `Finish`.

use orbit_core::provider::{FinishReason, StreamChunk, Usage};
use orbit_core::tool::ToolCall;
use std::collections::{BTreeMap, BTreeSet};

/// Typed events produced from the raw fragment feed.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Visible answer text.
    ContentDelta(String),

    /// Extended-thinking text.
    ReasoningDelta(String),

    /// A name or argument fragment for the call at `index`.
    ToolCallDelta {
        index: u32,
        name: Option<String>,
        arguments: Option<String>,
    },

    /// The call at `index` is complete and its arguments have been parsed.
    ToolCallComplete { index: u32, call: ToolCall },

    /// The backend ended the turn with a recognised finish reason.
    TurnComplete {
        reason: FinishReason,
        usage: Option<Usage>,
    },

    /// Out-of-sequence data that can be contained to the current turn.
    ProtocolError(String),

    /// The turn cannot be closed safely (no or unknown finish reason).
    MalformedTurn(String),
}

#[derive(Debug, Default)]
struct PendingCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

impl PendingCall {
    fn complete(self, index: u32) -> ToolCall {
        let id = self.id.unwrap_or_else(|| format!("call_{index}"));
        ToolCall::new(id, self.name, self.arguments)
    }
}

/// Incremental decoder for one model response.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    open: BTreeMap<u32, PendingCall>,
    closed: BTreeSet<u32>,
    terminated: bool,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the terminal fragment (or end of feed) has been seen.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Consume one fragment.
    pub fn feed(&mut self, chunk: StreamChunk) -> Vec<StreamEvent> {
        if self.terminated {
            return vec![StreamEvent::ProtocolError(
                "fragment received after the end of the turn".into(),
            )];
        }

        match chunk {
            StreamChunk::Content { text } if text.is_empty() => Vec::new(),
            StreamChunk::Content { text } => vec![StreamEvent::ContentDelta(text)],

            StreamChunk::Reasoning { text } if text.is_empty() => Vec::new(),
            StreamChunk::Reasoning { text } => vec![StreamEvent::ReasoningDelta(text)],

            StreamChunk::ToolCallDelta {
                index,
                id,
                name,
                arguments,
            } => self.tool_call_delta(index, id, name, arguments),

            StreamChunk::ToolCallEnd { index } => vec![self.close(index)],

            StreamChunk::Malformed { detail } => vec![StreamEvent::ProtocolError(detail)],

            StreamChunk::Finish { reason, usage } => self.finish_turn(reason, usage),
        }
    }

    /// The fragment feed ended. Reports a turn that never saw `Finish`.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.terminated {
            return Vec::new();
        }
        self.terminated = true;
        vec![StreamEvent::MalformedTurn(
            "response stream ended without a finish reason".into(),
        )]
    }

    fn tool_call_delta(
        &mut self,
        index: u32,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    ) -> Vec<StreamEvent> {
        if self.closed.contains(&index) {
            return vec![StreamEvent::ProtocolError(format!(
                "fragment for tool call {index} after its arguments ended"
            ))];
        }

        let pending = self.open.entry(index).or_default();
        if pending.id.is_none() {
            pending.id = id.filter(|id| !id.is_empty());
        }
        let name = name.filter(|n| !n.is_empty());
        let arguments = arguments.filter(|a| !a.is_empty());
        // Backends repeat the full name on later fragments; keep the latest.
        if let Some(name) = &name {
            pending.name.clone_from(name);
        }
        if let Some(arguments) = &arguments {
            pending.arguments.push_str(arguments);
        }

        if name.is_none() && arguments.is_none() {
            return Vec::new();
        }
        vec![StreamEvent::ToolCallDelta {
            index,
            name,
            arguments,
        }]
    }

    fn close(&mut self, index: u32) -> StreamEvent {
        match self.open.remove(&index) {
            Some(pending) => {
                self.closed.insert(index);
                StreamEvent::ToolCallComplete {
                    index,
                    call: pending.complete(index),
                }
            }
            None if self.closed.contains(&index) => {
                StreamEvent::ProtocolError(format!("tool call {index} was already completed"))
            }
            None => StreamEvent::ProtocolError(format!(
                "end of arguments for tool call {index}, which was never started"
            )),
        }
    }

    fn finish_turn(&mut self, reason: Option<String>, usage: Option<Usage>) -> Vec<StreamEvent> {
        self.terminated = true;

        let open: Vec<u32> = self.open.keys().copied().collect();
        let mut events: Vec<StreamEvent> = open.into_iter().map(|i| self.close(i)).collect();

        events.push(match reason.as_deref().map(FinishReason::parse) {
            Some(Some(reason)) => StreamEvent::TurnComplete { reason, usage },
            Some(None) => StreamEvent::MalformedTurn(format!(
                "unknown finish reason '{}'",
                reason.unwrap_or_default()
            )),
            None => StreamEvent::MalformedTurn("finish reason absent".into()),
        });
        events
    }
}
