//! Write file tool: create or overwrite a workspace file.

use crate::{Workspace, resolve, string_arg};
use async_trait::async_trait;
use orbit_core::error::ToolError;
use orbit_core::tool::{Arguments, Tool, ToolContext, ToolOutput};
use tracing::debug;

pub struct WriteFileTool {
    workspace: Workspace,
}

impl WriteFileTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file in the workspace. Creates directories if needed."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "The relative path to the file to write"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write to the file"
                }
            },
            "required": ["file_path", "content"]
        })
    }

    async fn execute(
        &self,
        arguments: Arguments,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let file_path = string_arg(&arguments, "file_path")?;
        let content = string_arg(&arguments, "content")?;
        let full_path = resolve(&self.workspace, self.name(), file_path)?;

        if let Some(parent) = full_path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Ok(ToolOutput::failed(format!("Error writing file: {e}")));
            }
        }

        debug!(path = %full_path.display(), bytes = content.len(), "Writing file");

        match tokio::fs::write(&full_path, content).await {
            Ok(()) => Ok(ToolOutput::ok(format!("Successfully wrote to {file_path}"))),
            Err(e) => Ok(ToolOutput::failed(format!("Error writing file: {e}"))),
        }
    }
}
