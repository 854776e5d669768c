//! Read file tool: return a workspace file's contents.

use crate::{Workspace, resolve, string_arg};
use async_trait::async_trait;
use orbit_core::error::ToolError;
use orbit_core::tool::{Arguments, Tool, ToolContext, ToolOutput};

pub struct ReadFileTool {
    workspace: Workspace,
}

impl ReadFileTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file from the workspace"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "The relative path to the file to read"
                }
            },
            "required": ["file_path"]
        })
    }

    async fn execute(
        &self,
        arguments: Arguments,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let file_path = string_arg(&arguments, "file_path")?;
        let full_path = resolve(&self.workspace, self.name(), file_path)?;

        if !full_path.exists() {
            return Ok(ToolOutput::failed(format!(
                "Error: File '{file_path}' not found"
            )));
        }

        match tokio::fs::read_to_string(&full_path).await {
            Ok(content) => Ok(ToolOutput::ok(format!("File: {file_path}\n\n{content}"))),
            Err(e) => Ok(ToolOutput::failed(format!("Error reading file: {e}"))),
        }
    }
}
