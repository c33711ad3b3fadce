//! MCP-to-Tool bridge
//!
//! Adapts MCP server tools into the runtime's `Tool` trait so they can
//! be registered in the `ToolRegistry` under the `<server>/<tool>`
//! namespace and flow through the same dispatch and permission path as
//! built-in tools.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::client::McpClient;
use super::protocol::McpTool;
use crate::error::Result;
use crate::tools::{
    ExecutionContext, ParameterSchema, Tool, ToolCategory, ToolRegistry, ToolResult, ToolSource,
};

/// Bridge that wraps one MCP tool as a runtime tool.
pub struct McpToolBridge {
    client: Arc<McpClient>,
    tool: McpTool,
    call_timeout: Duration,
}

impl McpToolBridge {
    /// Create a bridge for a specific MCP tool.
    pub fn new(client: Arc<McpClient>, tool: McpTool) -> Self {
        McpToolBridge {
            client,
            tool,
            call_timeout: Duration::from_secs(60),
        }
    }

    /// Builder: per-call timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Create bridges for every tool the server exposes.
    pub async fn from_server(client: Arc<McpClient>) -> Result<Vec<Self>> {
        let tools = client.list_tools().await?;
        Ok(tools
            .into_iter()
            .map(|tool| McpToolBridge::new(Arc::clone(&client), tool))
            .collect())
    }
}

#[async_trait]
impl Tool for McpToolBridge {
    fn name(&self) -> &str {
        &self.tool.name
    }

    fn description(&self) -> &str {
        &self.tool.description
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Other
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::from_json_schema(&self.tool.input_schema)
    }

    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<ToolResult> {
        let timeout = match ctx.time_budget {
            Some(budget) => budget.min(self.call_timeout),
            None => self.call_timeout,
        };

        match self
            .client
            .call_tool(&self.tool.name, args, Some(timeout))
            .await
        {
            Ok(result) => {
                let text = result.text();
                if result.is_error {
                    Ok(ToolResult::failure(text))
                } else {
                    Ok(ToolResult::success(text))
                }
            }
            Err(e) => Ok(ToolResult::failure(format!(
                "MCP tool '{}' failed: {}",
                self.tool.name, e
            ))),
        }
    }
}

/// Discover a server's tools and merge them into the registry under the
/// `<server>/<tool>` namespace. Returns the number registered.
pub async fn register_server_tools(
    registry: &Arc<RwLock<ToolRegistry>>,
    client: Arc<McpClient>,
) -> Result<usize> {
    let server = client.name().to_string();
    let bridges = McpToolBridge::from_server(client).await?;
    let count = bridges.len();

    let mut registry = registry.write().expect("tool registry poisoned");
    for bridge in bridges {
        registry.register(Arc::new(bridge), ToolSource::Mcp(server.clone()))?;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bridge_exposes_schema_from_input_schema() {
        let tool = McpTool {
            name: "query".into(),
            description: "Run a query".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "sql": {"type": "string", "description": "SQL text"},
                },
                "required": ["sql"],
            }),
        };

        // The client is never used by parameters(); a disconnected one
        // is fine for this test.
        let client = Arc::new(McpClient::new(
            "db",
            Arc::new(crate::mcp::transport::StdioTransport::new("true", vec![])),
        ));
        let bridge = McpToolBridge::new(client, tool);

        assert_eq!(bridge.name(), "query");
        let schema = bridge.parameters();
        assert_eq!(schema.required, vec!["sql"]);
        assert!(schema.properties.contains_key("sql"));
    }
}
