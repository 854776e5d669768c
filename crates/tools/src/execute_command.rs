//! Execute command tool: run a shell command in the workspace directory.
//!
//! The child is spawned with `kill_on_drop`, so a caller that drops the
//! execution future (the dispatcher on timeout) takes the process down with
//! it. Cancellation through the tool context kills it explicitly.

use crate::{Workspace, string_arg};
use async_trait::async_trait;
use orbit_core::error::ToolError;
use orbit_core::tool::{Arguments, Tool, ToolContext, ToolOutput};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

pub struct ExecuteCommandTool {
    workspace: Workspace,
}

impl ExecuteCommandTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }

    fn command(&self, command: &str) -> Command {
        let mut cmd = if cfg!(target_os = "windows") {
            let mut cmd = Command::new("cmd");
            cmd.args(["/C", command]);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.args(["-c", command]);
            cmd
        };
        cmd.current_dir(self.workspace.root())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// Render captured process output the way the model expects it.
fn format_output(stdout: &str, stderr: &str, exit_code: i32) -> String {
    let mut sections = Vec::with_capacity(3);
    if !stdout.is_empty() {
        sections.push(format!("STDOUT:\n{stdout}"));
    }
    if !stderr.is_empty() {
        sections.push(format!("STDERR:\n{stderr}"));
    }
    sections.push(format!("Exit code: {exit_code}"));
    sections.join("\n\n")
}

#[async_trait]
impl Tool for ExecuteCommandTool {
    fn name(&self) -> &str {
        "execute_command"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the workspace directory. Use with caution."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(
        &self,
        arguments: Arguments,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let command = string_arg(&arguments, "command")?;

        debug!(command = %command, call_id = %ctx.call_id, "Executing shell command");

        let child = self
            .command(command)
            .spawn()
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: format!("failed to spawn process: {e}"),
            })?;

        let output = tokio::select! {
            result = child.wait_with_output() => {
                result.map_err(|e| ToolError::ExecutionFailed {
                    tool_name: self.name().into(),
                    reason: e.to_string(),
                })?
            }
            () = ctx.cancellation.cancelled() => {
                // Dropping the wait future drops the child, which kills it.
                debug!(command = %command, "Command cancelled");
                return Err(ToolError::Cancelled(self.name().into()));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);

        if !output.status.success() {
            warn!(command = %command, exit_code, "Command failed");
        }

        let content = format_output(&stdout, &stderr, exit_code);
        Ok(if output.status.success() {
            ToolOutput::ok(content)
        } else {
            ToolOutput::failed(content)
        })
    }
}
