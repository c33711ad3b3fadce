//! Shell tools backed by the shell manager.
//!
//! `bash` runs a command (foreground or background), `bash_output`
//! drains new output from a background shell, and `kill_shell` stops
//! one. All three address shells through the process-wide manager.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::tools::schema::{ParamType, ParameterSchema};
use crate::tools::shell::ShellManager;
use crate::tools::traits::{ExecutionContext, Tool, ToolCategory, ToolResult};

/// Default foreground command timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Built-in tool: run a shell command
pub struct BashTool;

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Run a shell command. Set background=true for long-running commands \
         and read their output later with bash_output"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Shell
    }

    fn requires_confirmation(&self) -> bool {
        true
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new()
            .property("command", ParamType::String, "Command to execute", true)
            .property(
                "background",
                ParamType::Boolean,
                "Run in the background and return a shell id immediately",
                false,
            )
            .property(
                "timeout",
                ParamType::Integer,
                "Foreground timeout in seconds (default 120)",
                false,
            )
    }

    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<ToolResult> {
        let command = args
            .get("command")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidInput("Missing 'command' parameter".to_string()))?;
        let background = args
            .get("background")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let manager = ShellManager::global();
        let shell_id = manager.create(command, &ctx.working_dir, &ctx.env).await?;

        if background {
            return Ok(ToolResult::success_with_metadata(
                format!("Started background shell {}", shell_id),
                json!({"shell_id": shell_id}),
            ));
        }

        let timeout_secs = args
            .get("timeout")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let timeout = match ctx.time_budget {
            Some(budget) => budget.min(Duration::from_secs(timeout_secs)),
            None => Duration::from_secs(timeout_secs),
        };

        match manager.wait(&shell_id, Some(timeout)).await {
            Ok(exit_code) => {
                let output = manager.read_output(&shell_id, true).await?;
                let metadata = json!({"shell_id": shell_id, "exit_code": exit_code});
                if exit_code == 0 {
                    Ok(ToolResult::success_with_metadata(output, metadata))
                } else {
                    Ok(ToolResult {
                        success: false,
                        content: None,
                        error: Some(format!(
                            "Command exited with code {}\n{}",
                            exit_code, output
                        )),
                        metadata: Some(metadata),
                    })
                }
            }
            Err(Error::Timeout(_)) => {
                manager.kill(&shell_id).await.ok();
                let output = manager.read_output(&shell_id, true).await.unwrap_or_default();
                Ok(ToolResult::failure(format!(
                    "Command timed out after {}s\n{}",
                    timeout.as_secs(),
                    output
                )))
            }
            Err(e) => Err(e),
        }
    }
}

/// Built-in tool: read new output from a background shell
pub struct BashOutputTool;

#[async_trait]
impl Tool for BashOutputTool {
    fn name(&self) -> &str {
        "bash_output"
    }

    fn description(&self) -> &str {
        "Read output appended since the last read from a background shell"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Shell
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new()
            .property("shell_id", ParamType::String, "Shell id from bash", true)
            .property(
                "include_stderr",
                ParamType::Boolean,
                "Include stderr (default true)",
                false,
            )
    }

    async fn execute(&self, args: Value, _ctx: &ExecutionContext) -> Result<ToolResult> {
        let shell_id = args
            .get("shell_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidInput("Missing 'shell_id' parameter".to_string()))?;
        let include_stderr = args
            .get("include_stderr")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        let manager = ShellManager::global();
        match manager.read_output(shell_id, include_stderr).await {
            Ok(output) => {
                let shell = manager.get(shell_id).await;
                let status = match shell {
                    Some(handle) => {
                        let guard = handle.lock().await;
                        json!({"status": guard.status, "exit_code": guard.exit_code})
                    }
                    None => Value::Null,
                };
                Ok(ToolResult::success_with_metadata(output, status))
            }
            Err(Error::NotFound(msg)) => Ok(ToolResult::failure(msg)),
            Err(e) => Err(e),
        }
    }
}

/// Built-in tool: kill a background shell
pub struct KillShellTool;

#[async_trait]
impl Tool for KillShellTool {
    fn name(&self) -> &str {
        "kill_shell"
    }

    fn description(&self) -> &str {
        "Forcefully terminate a background shell"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Shell
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new().property("shell_id", ParamType::String, "Shell id to kill", true)
    }

    async fn execute(&self, args: Value, _ctx: &ExecutionContext) -> Result<ToolResult> {
        let shell_id = args
            .get("shell_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidInput("Missing 'shell_id' parameter".to_string()))?;

        match ShellManager::global().kill(shell_id).await {
            Ok(()) => Ok(ToolResult::success(format!("Killed shell {}", shell_id))),
            Err(Error::NotFound(msg)) => Ok(ToolResult::failure(msg)),
            Err(e) => Err(e),
        }
    }
}
