//! Write file tool
//!
//! Allows the agent to create or overwrite files inside the call's
//! working directory. Requires confirmation by default.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::tools::schema::{ParamType, ParameterSchema};
use crate::tools::traits::{ExecutionContext, Tool, ToolCategory, ToolResult};

/// Built-in tool: write a file
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating parent directories as needed"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::File
    }

    fn requires_confirmation(&self) -> bool {
        true
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new()
            .property(
                "path",
                ParamType::String,
                "Path to write, relative to the working directory",
                true,
            )
            .property("content", ParamType::String, "File content", true)
    }

    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<ToolResult> {
        let path = args
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| crate::Error::InvalidInput("Missing 'path' parameter".to_string()))?;
        let content = args
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| crate::Error::InvalidInput("Missing 'content' parameter".to_string()))?;

        let root = match tokio::fs::canonicalize(&ctx.working_dir).await {
            Ok(root) => root,
            Err(e) => return Ok(ToolResult::failure(format!("Invalid working directory: {}", e))),
        };

        // The file may not exist yet; scope-check its parent instead.
        let full_path = ctx.working_dir.join(path);
        let parent = full_path.parent().unwrap_or(&full_path);
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            return Ok(ToolResult::failure(format!("Failed to create parent: {}", e)));
        }
        let resolved_parent = match tokio::fs::canonicalize(parent).await {
            Ok(resolved) => resolved,
            Err(e) => return Ok(ToolResult::failure(format!("Invalid path: {}", e))),
        };
        if !resolved_parent.starts_with(&root) {
            return Ok(ToolResult::failure(
                "Access denied: path outside working directory",
            ));
        }

        match tokio::fs::write(&full_path, content).await {
            Ok(()) => Ok(ToolResult::success(format!(
                "Wrote {} bytes to {}",
                content.len(),
                path
            ))),
            Err(e) => Ok(ToolResult::failure(format!("Failed to write file: {}", e))),
        }
    }
}
