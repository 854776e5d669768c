//! Search files tool: glob search over the workspace tree.
//!
//! Patterns are matched against workspace-relative paths with `/` as the
//! separator; `*` does not cross directories, `**` does.

use crate::{Workspace, string_arg};
use async_trait::async_trait;
use orbit_core::error::ToolError;
use orbit_core::tool::{Arguments, Tool, ToolContext, ToolOutput};
use std::path::Path;

pub struct SearchFilesTool {
    workspace: Workspace,
}

impl SearchFilesTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

/// Walk `root` and collect workspace-relative paths matching `matcher`, sorted.
fn collect_matches(root: &Path, matcher: &globset::GlobMatcher) -> Vec<String> {
    let mut matches: Vec<String> = walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let rel = entry.path().strip_prefix(root).ok()?;
            let rel = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            matcher.is_match(&rel).then_some(rel)
        })
        .collect();
    matches.sort();
    matches
}

#[async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Search for files by name pattern in the workspace"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "The glob pattern to search for (e.g., '*.py', 'src/**/*.js')"
                }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(
        &self,
        arguments: Arguments,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let pattern = string_arg(&arguments, "pattern")?.to_string();

        let matcher = match globset::GlobBuilder::new(&pattern)
            .literal_separator(true)
            .build()
        {
            Ok(glob) => glob.compile_matcher(),
            Err(e) => return Ok(ToolOutput::failed(format!("Error searching files: {e}"))),
        };

        let root = self.workspace.root().to_path_buf();
        let matches = tokio::task::spawn_blocking(move || collect_matches(&root, &matcher))
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: e.to_string(),
            })?;

        if matches.is_empty() {
            return Ok(ToolOutput::ok(format!(
                "No files found matching pattern: {pattern}"
            )));
        }

        Ok(ToolOutput::ok(format!(
            "Found {} file(s) matching '{pattern}':\n\n{}",
            matches.len(),
            matches.join("\n")
        )))
    }
}
