//! Delete file tool. Directories are refused.

use crate::{Workspace, resolve, string_arg};
use async_trait::async_trait;
use orbit_core::error::ToolError;
use orbit_core::tool::{Arguments, Tool, ToolContext, ToolOutput};
use tracing::info;

pub struct DeleteFileTool {
    workspace: Workspace,
}

impl DeleteFileTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a file from the workspace"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "The relative path to the file to delete"
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
        if full_path.is_dir() {
            return Ok(ToolOutput::failed(format!(
                "Error: '{file_path}' is a directory. Use a file manager to delete directories."
            )));
        }

        match tokio::fs::remove_file(&full_path).await {
            Ok(()) => {
                info!(path = %full_path.display(), "Deleted file");
                Ok(ToolOutput::ok(format!("Successfully deleted {file_path}")))
            }
            Err(e) => Ok(ToolOutput::failed(format!("Error deleting file: {e}"))),
        }
    }
}
