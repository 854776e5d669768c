//! The orbit turn-orchestration engine.
//!
//! A user submission drives a loop of model turns:
//!
//! 1. **Request**: system prompt + conversation + tool schemas go to the provider
//! 2. **Decode**: streamed fragments are reassembled by the [`StreamDecoder`]
//! 3. **Dispatch**: requested tool calls run concurrently in the [`ToolDispatcher`]
//! 4. **Commit**: the assistant turn and its results are appended in issuance order
//! 5. **Repeat** until the model answers, or the iteration safeguard stops it
//!
//! The [`OrchestrationLoop`] is the only writer of conversation history.

pub mod decoder;
pub mod dispatcher;
pub mod loop_runner;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use decoder::{StreamDecoder, StreamEvent};
pub use dispatcher::ToolDispatcher;
pub use loop_runner::{OrchestrationLoop, TurnOutcome};
