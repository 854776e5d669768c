//! Tool dispatcher: runs requested tool calls and always produces a result.
//!
//! Every failure mode (unknown tool, unparseable or incomplete arguments,
//! executor error, timeout, cancellation) is converted into a [`ToolResult`]
//! whose output describes the error to the model. Nothing here returns
//! `Err` to the loop.

use futures::StreamExt;
use futures::future::join_all;
use orbit_core::error::ToolError;
use orbit_core::tool::{ToolCall, ToolContext, ToolRegistry, ToolResult, missing_required};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Executes tool calls against a registry under per-call time budgets.
#[derive(Clone)]
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    default_timeout: Duration,
    max_parallel: Option<usize>,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, default_timeout: Duration) -> Self {
        Self {
            registry,
            default_timeout,
            max_parallel: None,
        }
    }

    /// Cap the number of calls that run at once. `None` runs all together.
    pub fn with_max_parallel(mut self, max_parallel: Option<usize>) -> Self {
        self.max_parallel = max_parallel.map(|n| n.max(1));
        self
    }

    /// Execute one call. Never fails.
    pub async fn execute(&self, call: &ToolCall, cancel: &CancellationToken) -> ToolResult {
        let tool = match self.registry.lookup(&call.name) {
            Ok(tool) => tool,
            Err(e) => {
                warn!(tool = %call.name, call_id = %call.id, "Model requested unknown tool");
                return ToolResult::from_error(&call.id, &e);
            }
        };

        let arguments = match &call.arguments {
            Ok(arguments) => arguments.clone(),
            Err(detail) => {
                let err = ToolError::InvalidArguments(format!("{}: {detail}", call.name));
                warn!(tool = %call.name, call_id = %call.id, error = %err, "Unparseable tool arguments");
                return ToolResult::from_error(&call.id, &err);
            }
        };

        let missing = missing_required(&tool.parameters_schema(), &arguments);
        if !missing.is_empty() {
            let err = ToolError::InvalidArguments(format!(
                "{}: missing required argument(s): {}",
                call.name,
                missing.join(", ")
            ));
            return ToolResult::from_error(&call.id, &err);
        }

        let budget = tool.timeout().unwrap_or(self.default_timeout);
        let ctx = ToolContext {
            call_id: call.id.clone(),
            cancellation: cancel.child_token(),
        };

        debug!(tool = %call.name, call_id = %call.id, ?budget, "Executing tool");
        let started = Instant::now();

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                ctx.cancellation.cancel();
                Err(ToolError::Cancelled(call.name.clone()))
            }
            result = tokio::time::timeout(budget, tool.execute(arguments, &ctx)) => match result {
                Ok(result) => result,
                Err(_) => {
                    // The execution future is dropped here; process tools
                    // kill their child on drop and on this token.
                    ctx.cancellation.cancel();
                    Err(ToolError::Timeout {
                        tool_name: call.name.clone(),
                        timeout: budget,
                    })
                }
            },
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(output) => {
                debug!(tool = %call.name, call_id = %call.id, elapsed_ms, success = output.success, "Tool finished");
                ToolResult::from_output(&call.id, output)
            }
            Err(e) => {
                warn!(tool = %call.name, call_id = %call.id, elapsed_ms, error = %e, "Tool failed");
                ToolResult::from_error(&call.id, &e)
            }
        }
    }

    /// Execute all calls of one turn concurrently.
    ///
    /// Results are returned in the order of `calls`, regardless of which
    /// execution finishes first. `on_start` / `on_finish` fire per call as
    /// execution begins and ends.
    pub async fn execute_all<S, F>(
        &self,
        calls: &[ToolCall],
        cancel: &CancellationToken,
        on_start: S,
        on_finish: F,
    ) -> Vec<ToolResult>
    where
        S: Fn(&ToolCall),
        F: Fn(&ToolCall, &ToolResult),
    {
        let runs: Vec<_> = calls
            .iter()
            .map(|call| self.run_one(call, cancel, &on_start, &on_finish))
            .collect();

        match self.max_parallel {
            None => join_all(runs).await,
            Some(cap) => futures::stream::iter(runs).buffered(cap).collect().await,
        }
    }

    async fn run_one<S, F>(
        &self,
        call: &ToolCall,
        cancel: &CancellationToken,
        on_start: &S,
        on_finish: &F,
    ) -> ToolResult
    where
        S: Fn(&ToolCall),
        F: Fn(&ToolCall, &ToolResult),
    {
        on_start(call);
        let result = self.execute(call, cancel).await;
        on_finish(call, &result);
        result
    }
}
