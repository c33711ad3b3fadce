//! Core tool trait and result types

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::schema::ParameterSchema;
use crate::cancel::CancelToken;
use crate::error::Result;
use crate::llm::{FunctionDefinition, ToolDefinition};

/// Category a tool belongs to, used by permission rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    /// Filesystem access
    File,
    /// Shell command execution
    Shell,
    /// Network/web access
    Web,
    /// Version control operations
    Vcs,
    /// Everything else
    Other,
}

impl ToolCategory {
    /// Category name as used in `category:<name>` permission patterns.
    pub fn name(&self) -> &'static str {
        match self {
            ToolCategory::File => "file",
            ToolCategory::Shell => "shell",
            ToolCategory::Web => "web",
            ToolCategory::Vcs => "vcs",
            ToolCategory::Other => "other",
        }
    }
}

/// Everything a tool may need from its caller: where to run, what
/// environment to overlay, and how to notice cancellation.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Working directory for filesystem and shell operations
    pub working_dir: PathBuf,
    /// Environment overlay applied to spawned processes
    pub env: HashMap<String, String>,
    /// Session the call belongs to, if any
    pub session_id: Option<String>,
    /// Remaining time budget imposed by the agent loop
    pub time_budget: Option<Duration>,
    /// Cooperative cancellation signal
    pub cancel: CancelToken,
}

impl ExecutionContext {
    /// Context rooted at a working directory with no overlays.
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        ExecutionContext {
            working_dir: working_dir.into(),
            env: HashMap::new(),
            session_id: None,
            time_budget: None,
            cancel: CancelToken::new(),
        }
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }
}

/// A tool that can be called by the LLM
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool name
    fn name(&self) -> &str;

    /// Get the tool description
    fn description(&self) -> &str;

    /// Category used for permission matching
    fn category(&self) -> ToolCategory {
        ToolCategory::Other
    }

    /// Parameter schema for validation and the LLM tool definition
    fn parameters(&self) -> ParameterSchema;

    /// Whether invoking this tool should prompt the user by default
    fn requires_confirmation(&self) -> bool {
        false
    }

    /// Execute the tool with validated arguments
    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<ToolResult>;

    /// Convert to the chat-completions tool definition
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: self.name().to_string(),
                description: self.description().to_string(),
                parameters: self.parameters().to_json_schema(),
            },
        }
    }
}

/// Result of a tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the execution was successful
    pub success: bool,
    /// Result content (for successful execution)
    pub content: Option<String>,
    /// Error message (for failed execution)
    pub error: Option<String>,
    /// Additional metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ToolResult {
    /// Create a successful result
    pub fn success(content: impl Into<String>) -> Self {
        ToolResult {
            success: true,
            content: Some(content.into()),
            error: None,
            metadata: None,
        }
    }

    /// Create a successful result with metadata
    pub fn success_with_metadata(content: impl Into<String>, metadata: Value) -> Self {
        ToolResult {
            success: true,
            content: Some(content.into()),
            error: None,
            metadata: Some(metadata),
        }
    }

    /// Create a failed result
    pub fn failure(error: impl Into<String>) -> Self {
        ToolResult {
            success: false,
            content: None,
            error: Some(error.into()),
            metadata: None,
        }
    }

    /// Render the result as the body of a tool message
    pub fn to_message_content(&self) -> String {
        if self.success {
            self.content.clone().unwrap_or_default()
        } else {
            self.error.clone().unwrap_or_default()
        }
    }
}

/// A tool call resolved from the LLM's request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool call ID (produced by the model)
    pub id: String,
    /// Tool name
    pub name: String,
    /// Tool arguments as JSON
    pub arguments: Value,
}

impl ToolCall {
    /// Parse arguments into a specific type
    pub fn parse_arguments<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        serde_json::from_value(self.arguments.clone())
            .map_err(|e| crate::Error::InvalidInput(format!("Invalid tool arguments: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_result_constructors() {
        let ok = ToolResult::success("Done!");
        assert!(ok.success);
        assert_eq!(ok.to_message_content(), "Done!");

        let failed = ToolResult::failure("Oops!");
        assert!(!failed.success);
        assert_eq!(failed.to_message_content(), "Oops!");
    }

    #[test]
    fn tool_call_parses_arguments() {
        #[derive(Deserialize)]
        struct Args {
            path: String,
        }

        let call = ToolCall {
            id: "call_1".into(),
            name: "read_file".into(),
            arguments: serde_json::json!({"path": "/tmp/a"}),
        };
        let args: Args = call.parse_arguments().unwrap();
        assert_eq!(args.path, "/tmp/a");
    }

    #[test]
    fn category_names() {
        assert_eq!(ToolCategory::File.name(), "file");
        assert_eq!(ToolCategory::Shell.name(), "shell");
    }
}
