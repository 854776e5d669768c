//! The orchestration loop: one conversation, one turn in flight.
//!
//! A submission walks the state machine
//! `Idle → AwaitingModel → StreamingResponse → (DispatchingTools → AwaitingModel)* → Done | Failed`
//! and settles back to `Idle` when it returns. History is mutated only here;
//! the decoder and dispatcher hand back data.
//!
//! A model turn is committed to history as a unit: the assistant message with
//! its tool calls goes in together with every tool result, after the join.
//! A cancelled turn therefore leaves nothing behind.

use crate::decoder::{StreamDecoder, StreamEvent};
use crate::dispatcher::ToolDispatcher;
use orbit_core::agent::{FailureReason, LoopSettings, LoopState};
use orbit_core::error::{Error, Result};
use orbit_core::event::{EventBus, LoopEvent};
use orbit_core::message::{Conversation, Message};
use orbit_core::provider::{FinishReason, Provider, ProviderRequest, ToolDefinition, Usage};
use orbit_core::tool::{ToolCall, ToolRegistry};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// How a submission ended, when it ended without a transport or protocol
/// failure.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// The model produced its final answer.
    Completed {
        content: String,
        /// Tool round trips taken before the answer
        iterations: u32,
        /// Usage summed over every model request of the submission
        usage: Option<Usage>,
    },

    /// The safeguard stopped the submission before another model request.
    IterationLimitReached { max: u32, message: String },

    /// `cancel()` was called while the submission was in flight.
    Cancelled,
}

struct Inner {
    state: LoopState,
    history: Conversation,
    cancel: Option<CancellationToken>,
}

/// What one model response amounted to once its feed ended.
#[derive(Default)]
struct ModelTurn {
    content: String,
    calls: Vec<(u32, ToolCall)>,
    finish: Option<FinishReason>,
    usage: Option<Usage>,
    protocol_errors: Vec<String>,
}

/// What the loop does with a finished model turn.
enum Disposition {
    Answer(String),
    Dispatch { content: String, calls: Vec<ToolCall> },
}

/// Drives one conversation against a provider and a tool registry.
///
/// Share it behind an `Arc`: `submit` takes `&self`, and `cancel` or `state`
/// may be called from other tasks while a submission is running.
pub struct OrchestrationLoop {
    provider: Arc<dyn Provider>,
    registry: Arc<ToolRegistry>,
    dispatcher: ToolDispatcher,
    settings: LoopSettings,
    system_prompt: Option<String>,
    events: Arc<EventBus>,
    inner: Mutex<Inner>,
}

impl OrchestrationLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: Arc<ToolRegistry>,
        settings: LoopSettings,
    ) -> Self {
        let dispatcher = ToolDispatcher::new(registry.clone(), settings.tool_timeout)
            .with_max_parallel(settings.max_parallel_tools);
        Self {
            provider,
            registry,
            dispatcher,
            settings,
            system_prompt: None,
            events: Arc::new(EventBus::default()),
            inner: Mutex::new(Inner {
                state: LoopState::Idle,
                history: Conversation::new(),
                cancel: None,
            }),
        }
    }

    /// Publish lifecycle events on a shared bus.
    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    /// Standing instructions prepended to every request.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<LoopEvent>> {
        self.events.subscribe()
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    pub fn state(&self) -> LoopState {
        self.lock().state.clone()
    }

    /// Snapshot of the conversation so far.
    pub fn history(&self) -> Conversation {
        self.lock().history.clone()
    }

    /// Start a fresh conversation. Only allowed while idle.
    pub fn clear_history(&self) -> Result<()> {
        let mut inner = self.lock();
        if !inner.state.is_idle() {
            return Err(Error::Busy);
        }
        inner.history = Conversation::new();
        info!(conversation_id = %inner.history.id, "Conversation cleared");
        Ok(())
    }

    /// Cancel the in-flight submission. Returns `false` when idle.
    pub fn cancel(&self) -> bool {
        match &self.lock().cancel {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Run one user submission to completion.
    ///
    /// Rejected with [`Error::Busy`] unless the loop is idle. Transport and
    /// unrecoverable protocol failures come back as `Err` after the loop has
    /// reported `Failed` and settled.
    pub async fn submit(&self, text: impl Into<String>) -> Result<TurnOutcome> {
        let text = text.into();
        let cancel = {
            let mut inner = self.lock();
            if !inner.state.is_idle() {
                debug!(state = ?inner.state, "Submission rejected: loop busy");
                return Err(Error::Busy);
            }
            let token = CancellationToken::new();
            inner.cancel = Some(token.clone());
            inner.state = LoopState::AwaitingModel;
            inner.history.push(Message::user(&text));
            info!(
                conversation_id = %inner.history.id,
                messages = inner.history.len(),
                "Processing submission"
            );
            token
        };
        self.events.publish(LoopEvent::StateChanged {
            from: LoopState::Idle,
            to: LoopState::AwaitingModel,
        });

        let _settle = SettleGuard { owner: self };
        let result = self.run(&cancel).await;
        self.report(&result);
        result
    }

    async fn run(&self, cancel: &CancellationToken) -> Result<TurnOutcome> {
        let tools = self.registry.definitions();
        let mut iteration: u32 = 0;
        let mut total_usage: Option<Usage> = None;

        loop {
            debug!(iteration, "Requesting model turn");
            let request = self.build_request(&tools);

            let Some(turn) = self.stream_turn(request, cancel).await? else {
                return Ok(TurnOutcome::Cancelled);
            };
            if let Some(usage) = &turn.usage {
                total_usage
                    .get_or_insert_with(Usage::default)
                    .accumulate(usage);
            }

            let (content, calls) = match Self::dispose(turn)? {
                Disposition::Answer(content) => {
                    self.lock().history.push(Message::assistant(&content));
                    return Ok(TurnOutcome::Completed {
                        content,
                        iterations: iteration,
                        usage: total_usage,
                    });
                }
                Disposition::Dispatch { content, calls } => (content, calls),
            };

            self.transition(LoopState::DispatchingTools);
            let max = self.settings.max_iterations;
            if iteration + 1 > max {
                warn!(max, "Tool iteration limit reached");
                return Ok(TurnOutcome::IterationLimitReached {
                    max,
                    message: format!(
                        "I've reached the maximum number of tool call iterations ({max}). \
                         Please provide further guidance."
                    ),
                });
            }

            debug!(tool_count = calls.len(), "Dispatching tool calls");
            let results = self
                .dispatcher
                .execute_all(
                    &calls,
                    cancel,
                    |call| {
                        self.events.publish(LoopEvent::ToolStarted {
                            id: call.id.clone(),
                            name: call.name.clone(),
                            arguments: call.arguments_value(),
                        })
                    },
                    |call, result| {
                        self.events.publish(LoopEvent::ToolFinished {
                            id: call.id.clone(),
                            name: call.name.clone(),
                            output: result.output.clone(),
                            success: result.success,
                        })
                    },
                )
                .await;

            if cancel.is_cancelled() {
                debug!("Submission cancelled during tool dispatch; discarding turn");
                return Ok(TurnOutcome::Cancelled);
            }

            {
                let mut inner = self.lock();
                inner.history.push(Message::assistant_with_tools(
                    content,
                    calls.iter().map(ToolCall::to_message_call).collect(),
                ));
                inner.history.extend(
                    results
                        .into_iter()
                        .map(|r| Message::tool_result(r.call_id, r.output)),
                );
                debug_assert!(inner.history.unanswered_tool_calls().is_empty());
            }

            iteration += 1;
            self.transition(LoopState::AwaitingModel);
        }
    }

    /// Read one model response through the decoder. `None` when cancelled.
    async fn stream_turn(
        &self,
        request: ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<Option<ModelTurn>> {
        let mut rx = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(None),
            rx = self.provider.stream(request) => rx?,
        };

        let mut decoder = StreamDecoder::new();
        let mut turn = ModelTurn::default();
        let mut streaming = false;

        while !decoder.is_terminated() {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(None),
                next = rx.recv() => next,
            };

            let events = match next {
                Some(Ok(chunk)) => {
                    if !streaming {
                        streaming = true;
                        self.transition(LoopState::StreamingResponse);
                    }
                    decoder.feed(chunk)
                }
                Some(Err(e)) => {
                    warn!(provider = self.provider.name(), error = %e, "Model stream failed");
                    return Err(e.into());
                }
                None => decoder.finish(),
            };

            for event in events {
                self.apply(&mut turn, event)?;
            }
        }

        Ok(Some(turn))
    }

    fn apply(&self, turn: &mut ModelTurn, event: StreamEvent) -> Result<()> {
        match event {
            StreamEvent::ContentDelta(text) => {
                turn.content.push_str(&text);
                self.events.publish(LoopEvent::ContentDelta { text });
            }
            StreamEvent::ReasoningDelta(text) => {
                self.events.publish(LoopEvent::ReasoningDelta { text });
            }
            StreamEvent::ToolCallDelta { index, name, .. } => {
                trace!(index, name = ?name, "Tool call fragment");
            }
            StreamEvent::ToolCallComplete { index, call } => {
                debug!(index, tool = %call.name, call_id = %call.id, "Tool call complete");
                turn.calls.push((index, call));
            }
            StreamEvent::TurnComplete { reason, usage } => {
                turn.finish = Some(reason);
                turn.usage = usage;
            }
            StreamEvent::ProtocolError(detail) => {
                warn!(%detail, "Protocol error in model stream");
                turn.protocol_errors.push(detail);
            }
            StreamEvent::MalformedTurn(detail) => {
                warn!(%detail, "Model turn cannot be closed");
                return Err(Error::Protocol(detail));
            }
        }
        Ok(())
    }

    /// Decide between a final answer and a tool dispatch.
    fn dispose(mut turn: ModelTurn) -> Result<Disposition> {
        let Some(reason) = turn.finish else {
            return Err(Error::Protocol("model turn ended without a finish reason".into()));
        };

        if let Some(detail) = turn.protocol_errors.first() {
            let note = format!("[Turn ended early: protocol error: {detail}]");
            return Ok(Disposition::Answer(with_note(turn.content, &note)));
        }

        turn.calls.sort_by_key(|(index, _)| *index);
        let calls: Vec<ToolCall> = turn.calls.into_iter().map(|(_, call)| call).collect();

        Ok(match reason {
            FinishReason::Stop | FinishReason::ToolCalls if !calls.is_empty() => {
                Disposition::Dispatch {
                    content: turn.content,
                    calls,
                }
            }
            FinishReason::Stop => Disposition::Answer(turn.content),
            FinishReason::ToolCalls => Disposition::Answer(with_note(
                turn.content,
                "[Turn ended: the model reported tool calls but sent none]",
            )),
            FinishReason::Length => Disposition::Answer(with_note(
                turn.content,
                "[Response truncated: the model reached its output token limit]",
            )),
            FinishReason::Error => Disposition::Answer(with_note(
                turn.content,
                "[Response ended: the model backend reported an error]",
            )),
        })
    }

    fn build_request(&self, tools: &[ToolDefinition]) -> ProviderRequest {
        let inner = self.lock();
        debug_assert!(inner.history.unanswered_tool_calls().is_empty());

        let mut messages = Vec::with_capacity(inner.history.len() + 1);
        if let Some(prompt) = &self.system_prompt {
            messages.push(Message::system(prompt));
        }
        messages.extend(inner.history.messages().iter().cloned());

        ProviderRequest {
            model: self.settings.model.clone(),
            messages,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
            tools: tools.to_vec(),
            route: self.settings.route.clone(),
            stream: true,
        }
    }

    /// Publish the terminal event for a finished submission.
    fn report(&self, result: &Result<TurnOutcome>) {
        match result {
            Ok(TurnOutcome::Completed {
                content,
                iterations,
                usage,
            }) => {
                info!(iterations, chars = content.len(), "Submission complete");
                self.transition(LoopState::Done);
                self.events.publish(LoopEvent::TurnComplete {
                    content: content.clone(),
                    usage: *usage,
                });
            }
            Ok(TurnOutcome::IterationLimitReached { max, message }) => {
                self.fail(FailureReason::IterationLimitExceeded { max: *max }, message.clone());
            }
            Ok(TurnOutcome::Cancelled) => {
                info!("Submission cancelled");
                self.events.publish(LoopEvent::Cancelled);
            }
            Err(Error::Transport(e)) => {
                self.fail(FailureReason::Transport(e.to_string()), e.to_string());
            }
            Err(Error::Protocol(detail)) => {
                self.fail(FailureReason::Protocol(detail.clone()), detail.clone());
            }
            Err(other) => {
                self.fail(FailureReason::Protocol(other.to_string()), other.to_string());
            }
        }
    }

    fn fail(&self, reason: FailureReason, message: String) {
        warn!(%reason, "Submission failed");
        self.transition(LoopState::Failed(reason.clone()));
        self.events.publish(LoopEvent::Failed { reason, message });
    }

    fn transition(&self, to: LoopState) {
        let from = std::mem::replace(&mut self.lock().state, to.clone());
        if from != to {
            trace!(?from, ?to, "Loop state changed");
            self.events.publish(LoopEvent::StateChanged { from, to });
        }
    }

    /// Return to `Idle` and drop the submission's cancellation token.
    fn settle(&self) {
        let from = {
            let mut inner = self.lock();
            if let Some(token) = inner.cancel.take() {
                token.cancel();
            }
            std::mem::take(&mut inner.state)
        };
        if !from.is_idle() {
            self.events.publish(LoopEvent::StateChanged {
                from,
                to: LoopState::Idle,
            });
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Settles the loop when a submission returns or its future is dropped.
struct SettleGuard<'a> {
    owner: &'a OrchestrationLoop,
}

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        self.owner.settle();
    }
}

fn with_note(content: String, note: &str) -> String {
    if content.is_empty() {
        note.to_string()
    } else {
        format!("{content}\n\n{note}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use orbit_core::error::ProviderError;
    use orbit_core::message::Role;
    use orbit_core::provider::StreamChunk;
    use std::time::Duration;

    fn registry(tools: Vec<StubTool>) -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        for tool in tools {
            registry.register(Box::new(tool)).unwrap();
        }
        Arc::new(registry)
    }

    fn agent(provider: &Arc<ScriptedProvider>, tools: Vec<StubTool>) -> OrchestrationLoop {
        OrchestrationLoop::new(provider.clone(), registry(tools), LoopSettings::new("mock-model"))
    }

    fn states(events: &[LoopEvent]) -> Vec<LoopState> {
        events
            .iter()
            .filter_map(|e| match e {
                LoopEvent::StateChanged { to, .. } => Some(to.clone()),
                _ => None,
            })
            .collect()
    }

    async fn wait_for(agent: &OrchestrationLoop, state: LoopState) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while agent.state() != state {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("loop never reached the expected state");
    }

    #[tokio::test]
    async fn plain_answer() {
        let provider = Arc::new(ScriptedProvider::new(vec![text_turn("Hello! How can I help?")]));
        let agent = agent(&provider, vec![]);
        let mut rx = agent.subscribe();

        let outcome = agent.submit("Hello!").await.unwrap();
        assert_eq!(
            outcome,
            TurnOutcome::Completed {
                content: "Hello! How can I help?".into(),
                iterations: 0,
                usage: None,
            }
        );

        let history = agent.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history.messages()[0].role, Role::User);
        assert_eq!(history.messages()[1].content, "Hello! How can I help?");

        let events = drain(&mut rx);
        assert_eq!(
            states(&events),
            vec![
                LoopState::AwaitingModel,
                LoopState::StreamingResponse,
                LoopState::Done,
                LoopState::Idle
            ]
        );
        assert!(agent.state().is_idle());
    }

    #[tokio::test]
    async fn list_files_scenario() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_turn(&[("call_1", "list_dir", r#"{"path": "."}"#)]),
            text_turn("Found 3 files"),
        ]));
        let agent = agent(&provider, vec![StubTool::new("list_dir", "a.txt, b.txt, c.txt")]);
        let mut rx = agent.subscribe();

        let outcome = agent.submit("list files").await.unwrap();
        assert!(matches!(
            outcome,
            TurnOutcome::Completed { ref content, iterations: 1, .. } if content == "Found 3 files"
        ));

        let history = agent.history();
        let messages = history.messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].tool_calls.len(), 1);
        assert_eq!(messages[1].tool_calls[0].name, "list_dir");
        assert_eq!(messages[2].role, Role::Tool);
        assert_eq!(messages[2].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(messages[2].content, "a.txt, b.txt, c.txt");
        assert_eq!(messages[3].content, "Found 3 files");

        // The resubmitted request carries the tool result.
        let second = &provider.requests()[1];
        assert!(second.messages.iter().any(|m| m.role == Role::Tool));

        let events = drain(&mut rx);
        let completions: Vec<&LoopEvent> = events
            .iter()
            .filter(|e| matches!(e, LoopEvent::TurnComplete { .. }))
            .collect();
        assert_eq!(completions.len(), 1);
        assert!(matches!(
            completions[0],
            LoopEvent::TurnComplete { content, .. } if content == "Found 3 files"
        ));
        assert!(events.iter().any(|e| matches!(
            e,
            LoopEvent::ToolFinished { name, success: true, .. } if name == "list_dir"
        )));
    }

    #[tokio::test]
    async fn system_prompt_is_sent_but_not_stored() {
        let provider = Arc::new(ScriptedProvider::new(vec![text_turn("hi")]));
        let agent = agent(&provider, vec![]).with_system_prompt("You are orbit.");

        agent.submit("hello").await.unwrap();

        let request = &provider.requests()[0];
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.messages[0].content, "You are orbit.");
        assert!(request.stream);
        assert_eq!(request.model, "mock-model");
        assert!(agent.history().messages().iter().all(|m| m.role != Role::System));
    }

    #[tokio::test(start_paused = true)]
    async fn tool_timeout_is_data_not_failure() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_turn(&[("call_1", "hang", "{}")]),
            text_turn("The tool timed out."),
        ]));
        let agent = agent(
            &provider,
            vec![StubTool::new("hang", "never").delayed(Duration::from_secs(3600))],
        );
        let mut rx = agent.subscribe();

        let outcome = agent.submit("run it").await.unwrap();
        assert!(matches!(outcome, TurnOutcome::Completed { .. }));
        assert_eq!(
            agent.history().messages()[2].content,
            "Error: Tool timed out: hang after 30s"
        );

        let events = drain(&mut rx);
        let observed = states(&events);
        let dispatch = observed
            .iter()
            .position(|s| *s == LoopState::DispatchingTools)
            .unwrap();
        assert_eq!(observed[dispatch + 1], LoopState::AwaitingModel);
        assert!(!events.iter().any(|e| matches!(e, LoopEvent::Failed { .. })));
    }

    #[tokio::test]
    async fn iteration_limit_stops_before_another_request() {
        let scripts = (0..11)
            .map(|i| {
                let id = format!("call_{i}");
                tool_turn(&[(id.as_str(), "noop", "{}")])
            })
            .collect();
        let provider = Arc::new(ScriptedProvider::new(scripts));
        let agent = agent(&provider, vec![StubTool::new("noop", "ok")]);
        let mut rx = agent.subscribe();

        let outcome = agent.submit("loop forever").await.unwrap();
        assert!(matches!(
            outcome,
            TurnOutcome::IterationLimitReached { max: 10, ref message } if message.contains("(10)")
        ));
        assert_eq!(provider.request_count(), 11);

        // user + 10 × (assistant, tool); the eleventh turn is not committed.
        let history = agent.history();
        assert_eq!(history.len(), 21);
        assert!(history.unanswered_tool_calls().is_empty());

        let events = drain(&mut rx);
        let reason = FailureReason::IterationLimitExceeded { max: 10 };
        assert!(states(&events).contains(&LoopState::Failed(reason.clone())));
        assert!(events.iter().any(|e| matches!(
            e,
            LoopEvent::Failed { reason: r, .. } if *r == reason
        )));
        assert!(agent.state().is_idle());
    }

    #[tokio::test]
    async fn iteration_counter_resets_per_submission() {
        let mut settings = LoopSettings::new("mock-model");
        settings.max_iterations = 1;
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_turn(&[("a", "noop", "{}")]),
            text_turn("first"),
            tool_turn(&[("b", "noop", "{}")]),
            text_turn("second"),
        ]));
        let agent = OrchestrationLoop::new(
            provider.clone(),
            registry(vec![StubTool::new("noop", "ok")]),
            settings,
        );

        assert!(matches!(agent.submit("one").await.unwrap(), TurnOutcome::Completed { .. }));
        assert!(matches!(
            agent.submit("two").await.unwrap(),
            TurnOutcome::Completed { ref content, iterations: 1, .. } if content == "second"
        ));
    }

    #[tokio::test]
    async fn malformed_arguments_do_not_stop_the_loop() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_turn(&[("call_1", "list_dir", r#"{"path": "#)]),
            text_turn("Let me retry."),
        ]));
        let agent = agent(&provider, vec![StubTool::new("list_dir", "a.txt")]);

        let outcome = agent.submit("list").await.unwrap();
        assert!(matches!(outcome, TurnOutcome::Completed { .. }));
        assert_eq!(provider.request_count(), 2);

        let history = agent.history();
        let tool_message = &history.messages()[2];
        assert!(tool_message.content.starts_with("Error: Invalid tool arguments: list_dir"));
        // The raw text is replayed exactly as streamed.
        assert_eq!(history.messages()[1].tool_calls[0].arguments, r#"{"path": "#);
    }

    #[tokio::test(start_paused = true)]
    async fn tool_results_keep_issuance_order() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_turn(&[("A", "slow", "{}"), ("B", "fast", "{}")]),
            text_turn("done"),
        ]));
        let agent = agent(
            &provider,
            vec![
                StubTool::new("slow", "from A").delayed(Duration::from_millis(500)),
                StubTool::new("fast", "from B").delayed(Duration::from_millis(10)),
            ],
        );
        let mut rx = agent.subscribe();

        agent.submit("both").await.unwrap();

        let finished: Vec<String> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                LoopEvent::ToolFinished { id, .. } => Some(id),
                _ => None,
            })
            .collect();
        assert_eq!(finished, vec!["B", "A"]);

        let history = agent.history();
        let results: Vec<(&str, &str)> = history
            .messages()
            .iter()
            .filter(|m| m.role == Role::Tool)
            .map(|m| (m.tool_call_id.as_deref().unwrap(), m.content.as_str()))
            .collect();
        assert_eq!(results, vec![("A", "from A"), ("B", "from B")]);
    }

    #[tokio::test]
    async fn stop_with_tool_calls_dispatches() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Script::Turn(tool_chunks(&[("c1", "noop", "{}")], "stop", None)),
            text_turn("done"),
        ]));
        let agent = agent(&provider, vec![StubTool::new("noop", "ok")]);

        let outcome = agent.submit("go").await.unwrap();
        assert!(matches!(outcome, TurnOutcome::Completed { iterations: 1, .. }));
    }

    #[tokio::test]
    async fn usage_is_summed_across_requests() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Script::Turn(tool_chunks(&[("c1", "noop", "{}")], "tool_calls", Some(usage(100, 20)))),
            Script::Turn(vec![
                StreamChunk::content("done"),
                StreamChunk::Finish {
                    reason: Some("stop".into()),
                    usage: Some(usage(150, 5)),
                },
            ]),
        ]));
        let agent = agent(&provider, vec![StubTool::new("noop", "ok")]);

        let outcome = agent.submit("go").await.unwrap();
        assert!(matches!(
            outcome,
            TurnOutcome::Completed { usage: Some(u), .. } if u == usage(250, 25)
        ));
    }

    #[tokio::test]
    async fn busy_submit_is_rejected_and_cancel_leaves_history_consistent() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::Hold(vec![
            StreamChunk::content("thinking"),
        ])]));
        let agent = Arc::new(agent(&provider, vec![]));
        let mut rx = agent.subscribe();

        let running = {
            let agent = agent.clone();
            tokio::spawn(async move { agent.submit("first").await })
        };
        wait_for(&agent, LoopState::StreamingResponse).await;

        let err = agent.submit("second").await.unwrap_err();
        assert!(matches!(err, Error::Busy));
        assert_eq!(agent.state(), LoopState::StreamingResponse);
        assert!(matches!(agent.clear_history(), Err(Error::Busy)));

        assert!(agent.cancel());
        let outcome = running.await.unwrap().unwrap();
        assert_eq!(outcome, TurnOutcome::Cancelled);
        assert!(agent.state().is_idle());
        assert!(!agent.cancel());

        // Only the user message survives; the partial answer is discarded.
        let history = agent.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history.messages()[0].content, "first");
        assert_eq!(provider.request_count(), 1);
        assert!(drain(&mut rx).contains(&LoopEvent::Cancelled));
    }

    #[tokio::test]
    async fn cancel_during_dispatch_discards_the_turn() {
        let provider = Arc::new(ScriptedProvider::new(vec![tool_turn(&[(
            "call_1", "hang", "{}",
        )])]));
        let agent = Arc::new(agent(
            &provider,
            vec![StubTool::new("hang", "never").delayed(Duration::from_secs(3600))],
        ));

        let running = {
            let agent = agent.clone();
            tokio::spawn(async move { agent.submit("run it").await })
        };
        wait_for(&agent, LoopState::DispatchingTools).await;
        agent.cancel();

        let outcome = running.await.unwrap().unwrap();
        assert_eq!(outcome, TurnOutcome::Cancelled);
        let history = agent.history();
        assert_eq!(history.len(), 1);
        assert!(history.unanswered_tool_calls().is_empty());
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn spawned_submission_dispatches_tools_with_and_without_cap() {
        for cap in [None, Some(1)] {
            let provider = Arc::new(ScriptedProvider::new(vec![
                tool_turn(&[("call_1", "first", "{}"), ("call_2", "second", "{}")]),
                text_turn("Both done."),
            ]));
            let mut settings = LoopSettings::new("mock-model");
            settings.max_parallel_tools = cap;
            let agent = Arc::new(OrchestrationLoop::new(
                provider.clone(),
                registry(vec![StubTool::new("first", "one"), StubTool::new("second", "two")]),
                settings,
            ));

            let submission = {
                let agent = agent.clone();
                async move { agent.submit("run both").await }
            };
            assert_send(&submission);
            let outcome = tokio::spawn(submission).await.unwrap().unwrap();

            assert!(matches!(outcome, TurnOutcome::Completed { iterations: 1, .. }));
            let history = agent.history();
            assert_eq!(history.messages()[2].tool_call_id.as_deref(), Some("call_1"));
            assert_eq!(history.messages()[3].tool_call_id.as_deref(), Some("call_2"));
        }
    }

    #[tokio::test]
    async fn transport_error_fails_the_submission() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::Fail(
            ProviderError::AuthenticationFailed("invalid key".into()),
        )]));
        let agent = agent(&provider, vec![]);
        let mut rx = agent.subscribe();

        let err = agent.submit("hi").await.unwrap_err();
        assert!(matches!(err, Error::Transport(ProviderError::AuthenticationFailed(_))));

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            LoopEvent::Failed { reason: FailureReason::Transport(_), message }
                if message.contains("invalid key")
        )));
        assert!(agent.state().is_idle());
        assert_eq!(agent.history().len(), 1);
    }

    #[tokio::test]
    async fn contained_protocol_error_ends_turn_as_done() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::Turn(vec![
            StreamChunk::content("partial"),
            StreamChunk::ToolCallEnd { index: 7 },
            StreamChunk::finish("stop"),
        ])]));
        let agent = agent(&provider, vec![]);
        let mut rx = agent.subscribe();

        let outcome = agent.submit("hi").await.unwrap();
        let TurnOutcome::Completed { content, .. } = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert!(content.starts_with("partial\n\n[Turn ended early: protocol error:"));
        assert!(states(&drain(&mut rx)).contains(&LoopState::Done));
    }

    #[tokio::test]
    async fn unreadable_stream_data_is_noted_on_the_answer() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::Turn(vec![
            StreamChunk::content("Hello "),
            StreamChunk::Malformed {
                detail: "unparseable stream payload: EOF while parsing a string".into(),
            },
            StreamChunk::content("ld"),
            StreamChunk::finish("stop"),
        ])]));
        let agent = agent(&provider, vec![]);

        let outcome = agent.submit("hi").await.unwrap();
        let TurnOutcome::Completed { content, .. } = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert!(content.starts_with("Hello ld\n\n[Turn ended early: protocol error: unparseable"));
    }

    #[tokio::test]
    async fn length_finish_appends_a_note() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::Turn(vec![
            StreamChunk::content("cut"),
            StreamChunk::ToolCallDelta {
                index: 0,
                id: Some("c1".into()),
                name: Some("noop".into()),
                arguments: Some("{".into()),
            },
            StreamChunk::finish("length"),
        ])]));
        let agent = agent(&provider, vec![StubTool::new("noop", "ok")]);

        let outcome = agent.submit("hi").await.unwrap();
        assert!(matches!(
            outcome,
            TurnOutcome::Completed { ref content, iterations: 0, .. }
                if content.starts_with("cut\n\n[Response truncated")
        ));
        assert_eq!(provider.request_count(), 1);
        assert!(agent.history().messages()[1].tool_calls.is_empty());
    }

    #[tokio::test]
    async fn missing_finish_reason_fails_with_protocol_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::Turn(vec![
            StreamChunk::content("half an answer"),
        ])]));
        let agent = agent(&provider, vec![]);
        let mut rx = agent.subscribe();

        let err = agent.submit("hi").await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(states(&drain(&mut rx))
            .iter()
            .any(|s| matches!(s, LoopState::Failed(FailureReason::Protocol(_)))));
        assert_eq!(agent.history().len(), 1);
        assert!(agent.state().is_idle());
    }

    #[tokio::test]
    async fn clear_history_starts_fresh() {
        let provider = Arc::new(ScriptedProvider::new(vec![text_turn("hi")]));
        let agent = agent(&provider, vec![]);
        agent.submit("hello").await.unwrap();
        let before = agent.history().id;

        agent.clear_history().unwrap();
        assert!(agent.history().is_empty());
        assert_ne!(agent.history().id, before);
    }
}
