//! List directory tool.
//!
//! One row per entry, sorted by name: `TYPE SIZE path`, where directories
//! show `-` for the size and paths are relative to the workspace root.

use crate::{Workspace, resolve};
use async_trait::async_trait;
use orbit_core::error::ToolError;
use orbit_core::tool::{Arguments, Tool, ToolContext, ToolOutput};

pub struct ListDirectoryTool {
    workspace: Workspace,
}

impl ListDirectoryTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List files and directories in a given path"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "directory_path": {
                    "type": "string",
                    "description": "The relative path to the directory to list (default: current directory)"
                }
            },
            "required": []
        })
    }

    async fn execute(
        &self,
        arguments: Arguments,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let directory_path = match arguments.get("directory_path") {
            None | Some(serde_json::Value::Null) => ".",
            Some(serde_json::Value::String(s)) => s.as_str(),
            Some(_) => {
                return Err(ToolError::InvalidArguments(
                    "'directory_path' must be a string".into(),
                ));
            }
        };
        let full_path = resolve(&self.workspace, self.name(), directory_path)?;

        if !full_path.exists() {
            return Ok(ToolOutput::failed(format!(
                "Error: Directory '{directory_path}' not found"
            )));
        }
        if !full_path.is_dir() {
            return Ok(ToolOutput::failed(format!(
                "Error: '{directory_path}' is not a directory"
            )));
        }

        let mut read_dir = match tokio::fs::read_dir(&full_path).await {
            Ok(rd) => rd,
            Err(e) => return Ok(ToolOutput::failed(format!("Error listing directory: {e}"))),
        };

        let mut entries = Vec::new();
        loop {
            match read_dir.next_entry().await {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => break,
                Err(e) => {
                    return Ok(ToolOutput::failed(format!("Error listing directory: {e}")));
                }
            }
        }
        entries.sort_by_key(|e| e.file_name());

        let mut rows = Vec::with_capacity(entries.len());
        for entry in entries {
            let path = entry.path();
            let metadata = entry.metadata().await.ok();
            let is_dir = metadata.as_ref().is_some_and(|m| m.is_dir());
            let (kind, size) = if is_dir {
                ("DIR", "-".to_string())
            } else {
                (
                    "FILE",
                    metadata.map_or_else(|| "-".to_string(), |m| m.len().to_string()),
                )
            };
            rows.push(format!(
                "{kind:<6} {size:>10} {}",
                self.workspace.relative(&path)
            ));
        }

        Ok(ToolOutput::ok(format!(
            "Directory: {directory_path}\n\n{}",
            rows.join("\n")
        )))
    }
}
