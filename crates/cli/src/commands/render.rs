//! Plain-text rendering of loop lifecycle events.
//!
//! Answer text goes to `out`; tool activity, reasoning, and failures go to
//! `err` so that `orbit -m ... > answer.txt` captures only the answer.

use orbit_core::agent::LoopState;
use orbit_core::event::LoopEvent;
use std::io::{self, Write};

/// Longest tool output line shown in the activity log.
const PREVIEW_CHARS: usize = 120;

#[derive(Default)]
pub struct Renderer {
    /// Answer text already printed for the current model turn.
    shown: String,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render(
        &mut self,
        event: &LoopEvent,
        out: &mut impl Write,
        err: &mut impl Write,
    ) -> io::Result<()> {
        match event {
            LoopEvent::ContentDelta { text } => {
                self.shown.push_str(text);
                write!(out, "{text}")?;
                out.flush()?;
            }
            LoopEvent::ReasoningDelta { text } => {
                write!(err, "{text}")?;
            }
            LoopEvent::ToolStarted { name, arguments, .. } => {
                self.end_line(out)?;
                writeln!(err, "  [tool] {name} {arguments}")?;
            }
            LoopEvent::ToolFinished {
                name,
                output,
                success,
                ..
            } => {
                let status = if *success { "ok" } else { "error" };
                writeln!(err, "  [tool] {name} -> {status}: {}", preview(output))?;
            }
            LoopEvent::TurnComplete { content, .. } => {
                // Diagnostic notes are appended after streaming; print what
                // the stream did not already show.
                match content.strip_prefix(self.shown.as_str()) {
                    Some(rest) => write!(out, "{rest}")?,
                    None => write!(out, "\n{content}")?,
                }
                writeln!(out)?;
                self.shown.clear();
            }
            LoopEvent::Failed { message, .. } => {
                self.end_line(out)?;
                writeln!(err, "  [stopped] {message}")?;
            }
            LoopEvent::Cancelled => {
                self.end_line(out)?;
                writeln!(err, "  [cancelled]")?;
            }
            LoopEvent::StateChanged { to, .. } => {
                if *to == LoopState::AwaitingModel {
                    self.end_line(out)?;
                }
            }
        }
        Ok(())
    }

    /// Terminate a partially printed answer line.
    fn end_line(&mut self, out: &mut impl Write) -> io::Result<()> {
        if !self.shown.is_empty() {
            if !self.shown.ends_with('\n') {
                writeln!(out)?;
            }
            self.shown.clear();
        }
        Ok(())
    }
}

fn preview(output: &str) -> String {
    let first = output.lines().next().unwrap_or_default();
    let mut line: String = first.chars().take(PREVIEW_CHARS).collect();
    if line.len() < first.len() || output.lines().nth(1).is_some() {
        line.push_str(" ...");
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render_all(events: &[LoopEvent]) -> (String, String) {
        let mut renderer = Renderer::new();
        let (mut out, mut err) = (Vec::new(), Vec::new());
        for event in events {
            renderer.render(event, &mut out, &mut err).unwrap();
        }
        (
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    fn delta(text: &str) -> LoopEvent {
        LoopEvent::ContentDelta { text: text.into() }
    }

    #[test]
    fn streamed_answer_is_not_repeated() {
        let (out, _) = render_all(&[
            delta("Found"),
            delta(" 3 files"),
            LoopEvent::TurnComplete {
                content: "Found 3 files".into(),
                usage: None,
            },
        ]);
        assert_eq!(out, "Found 3 files\n");
    }

    #[test]
    fn appended_note_is_printed() {
        let (out, _) = render_all(&[
            delta("cut"),
            LoopEvent::TurnComplete {
                content: "cut\n\n[Response truncated]".into(),
                usage: None,
            },
        ]);
        assert_eq!(out, "cut\n\n[Response truncated]\n");
    }

    #[test]
    fn tool_activity_goes_to_stderr() {
        let (out, err) = render_all(&[
            delta("Let me look."),
            LoopEvent::ToolStarted {
                id: "c1".into(),
                name: "list_directory".into(),
                arguments: serde_json::json!({"directory_path": "."}),
            },
            LoopEvent::ToolFinished {
                id: "c1".into(),
                name: "list_directory".into(),
                output: "Directory: .\n\nfile 3 a.txt".into(),
                success: true,
            },
            LoopEvent::StateChanged {
                from: LoopState::DispatchingTools,
                to: LoopState::AwaitingModel,
            },
            delta("Done."),
            LoopEvent::TurnComplete {
                content: "Done.".into(),
                usage: None,
            },
        ]);
        assert_eq!(out, "Let me look.\nDone.\n");
        assert!(err.contains(r#"[tool] list_directory {"directory_path":"."}"#));
        assert!(err.contains("[tool] list_directory -> ok: Directory: . ..."));
    }

    #[test]
    fn failures_and_cancellation_are_reported() {
        let (_, err) = render_all(&[
            LoopEvent::Failed {
                reason: orbit_core::agent::FailureReason::IterationLimitExceeded { max: 10 },
                message: "limit reached".into(),
            },
            LoopEvent::Cancelled,
        ]);
        assert!(err.contains("[stopped] limit reached"));
        assert!(err.contains("[cancelled]"));
    }

    #[test]
    fn preview_truncates_long_output() {
        let long = "x".repeat(300);
        assert_eq!(preview(&long).chars().count(), PREVIEW_CHARS + 4);
        assert_eq!(preview("short"), "short");
    }
}
