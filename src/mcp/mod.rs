//! MCP (Model Context Protocol) module
//!
//! Connects the runtime to external tool providers speaking JSON-RPC
//! 2.0 over pluggable transports.
//!
//! ## Architecture
//!
//! - **protocol**: Wire protocol types (JSON-RPC based)
//! - **transport**: stdio and HTTP/SSE byte carriers
//! - **client**: request/response multiplexing and the capability surface
//! - **bridge**: adapts MCP tools into the runtime's `Tool` trait
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use openforge::mcp::{McpClient, StdioTransport};
//!
//! # async fn example() -> openforge::Result<()> {
//! // Connect to a local MCP server
//! let transport = Arc::new(StdioTransport::new("my-mcp-server", vec![]));
//! let client = McpClient::new("my-server", transport);
//! client.connect().await?;
//!
//! // List available tools
//! let tools = client.list_tools().await?;
//!
//! // Call a tool
//! let result = client
//!     .call_tool("tool_name", serde_json::json!({"arg": "value"}), None)
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod bridge;
mod client;
mod protocol;
mod transport;

pub use bridge::{register_server_tools, McpToolBridge};
pub use client::{ClientState, McpClient, ServerHandler};
pub use protocol::{
    parse_message, JsonRpcId, McpCapabilities, McpContent, McpMessage, McpNotification,
    McpPrompt, McpPromptArgument, McpPromptMessage, McpRequest, McpResource,
    McpResourceTemplate, McpResponse, McpServerInfo, McpTool, McpToolResult, McpWireError,
};
pub use transport::{HttpTransport, McpTransport, StdioTransport};
