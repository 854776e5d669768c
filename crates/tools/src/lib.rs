//! Built-in tool implementations for orbit.
//!
//! Tools give the assistant the ability to work inside one workspace
//! directory: read, write, and delete files, list directories, search by
//! glob pattern, and run shell commands.

pub mod delete_file;
pub mod execute_command;
pub mod list_directory;
pub mod read_file;
pub mod search_files;
pub mod workspace;
pub mod write_file;

pub use workspace::{PathError, Workspace};

use orbit_core::error::{RegistryError, ToolError};
use orbit_core::tool::{Arguments, ToolRegistry};
use std::path::PathBuf;

/// Create a tool registry with all built-in tools scoped to `workspace`.
pub fn default_registry(workspace: &Workspace) -> Result<ToolRegistry, RegistryError> {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(read_file::ReadFileTool::new(workspace.clone())))?;
    registry.register(Box::new(write_file::WriteFileTool::new(workspace.clone())))?;
    registry.register(Box::new(list_directory::ListDirectoryTool::new(
        workspace.clone(),
    )))?;
    registry.register(Box::new(execute_command::ExecuteCommandTool::new(
        workspace.clone(),
    )))?;
    registry.register(Box::new(search_files::SearchFilesTool::new(workspace.clone())))?;
    registry.register(Box::new(delete_file::DeleteFileTool::new(workspace.clone())))?;
    Ok(registry)
}

/// A required string argument.
pub(crate) fn string_arg<'a>(args: &'a Arguments, key: &str) -> Result<&'a str, ToolError> {
    match args.get(key) {
        Some(serde_json::Value::String(s)) => Ok(s),
        Some(_) => Err(ToolError::InvalidArguments(format!(
            "'{key}' must be a string"
        ))),
        None => Err(ToolError::InvalidArguments(format!(
            "Missing '{key}' argument"
        ))),
    }
}

/// Resolve a tool path, mapping scoping failures to `PermissionDenied`.
pub(crate) fn resolve(
    workspace: &Workspace,
    tool_name: &str,
    path: &str,
) -> Result<PathBuf, ToolError> {
    workspace
        .resolve(path)
        .map_err(|e| ToolError::PermissionDenied {
            tool_name: tool_name.into(),
            reason: e.to_string(),
        })
}
