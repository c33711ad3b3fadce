//! Read file tool
//!
//! Allows the agent to read files inside the call's working directory.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::tools::schema::{ParamType, ParameterSchema};
use crate::tools::traits::{ExecutionContext, Tool, ToolCategory, ToolResult};

/// Built-in tool: read a file
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file (path relative to the working directory)"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::File
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new().property(
            "path",
            ParamType::String,
            "Path to the file to read, relative to the working directory",
            true,
        )
    }

    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<ToolResult> {
        let path = args
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| crate::Error::InvalidInput("Missing 'path' parameter".to_string()))?;

        let full_path = ctx.working_dir.join(path);

        // Working-directory scoping: resolve and compare real paths.
        let root = match tokio::fs::canonicalize(&ctx.working_dir).await {
            Ok(root) => root,
            Err(e) => return Ok(ToolResult::failure(format!("Invalid working directory: {}", e))),
        };
        let resolved = match tokio::fs::canonicalize(&full_path).await {
            Ok(resolved) => resolved,
            Err(e) => return Ok(ToolResult::failure(format!("Failed to read file: {}", e))),
        };
        if !resolved.starts_with(&root) {
            return Ok(ToolResult::failure(
                "Access denied: path outside working directory",
            ));
        }

        match tokio::fs::read_to_string(&resolved).await {
            Ok(content) => Ok(ToolResult::success(content)),
            Err(e) => Ok(ToolResult::failure(format!("Failed to read file: {}", e))),
        }
    }
}
