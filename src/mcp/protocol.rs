//! MCP wire protocol types
//!
//! Based on the Model Context Protocol specification (JSON-RPC 2.0).
//! Parsing is permissive: optional fields missing from heterogeneous
//! server implementations default to empty.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// JSON-RPC id: servers may use numbers or strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcId {
    Number(i64),
    String(String),
}

impl JsonRpcId {
    /// Canonical text used to key the pending-request table.
    pub fn key(&self) -> String {
        match self {
            JsonRpcId::Number(n) => n.to_string(),
            JsonRpcId::String(s) => s.clone(),
        }
    }
}

impl From<i64> for JsonRpcId {
    fn from(n: i64) -> Self {
        JsonRpcId::Number(n)
    }
}

impl From<&str> for JsonRpcId {
    fn from(s: &str) -> Self {
        JsonRpcId::String(s.to_string())
    }
}

impl std::fmt::Display for JsonRpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// JSON-RPC request to an MCP server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpRequest {
    pub jsonrpc: String,
    pub id: JsonRpcId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl McpRequest {
    /// Create a new MCP request
    pub fn new(id: impl Into<JsonRpcId>, method: impl Into<String>, params: Option<Value>) -> Self {
        McpRequest {
            jsonrpc: "2.0".to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// Create an initialize request
    pub fn initialize(id: impl Into<JsonRpcId>) -> Self {
        Self::new(
            id,
            "initialize",
            Some(serde_json::json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {
                    "name": crate::NAME,
                    "version": crate::VERSION,
                }
            })),
        )
    }
}

/// JSON-RPC error object on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpWireError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// JSON-RPC response from an MCP server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpResponse {
    pub jsonrpc: String,
    pub id: Option<JsonRpcId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<McpWireError>,
}

impl McpResponse {
    /// Whether this response carries an error.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// JSON-RPC notification (no id, no response expected)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl McpNotification {
    /// Create a new notification
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        McpNotification {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
        }
    }
}

/// Any JSON-RPC message arriving on a transport.
#[derive(Debug, Clone)]
pub enum McpMessage {
    Request(McpRequest),
    Response(McpResponse),
    Notification(McpNotification),
}

/// Classify a raw JSON value as a request, response, or notification.
pub fn parse_message(value: Value) -> Result<McpMessage> {
    let object = value
        .as_object()
        .ok_or_else(|| Error::InvalidInput("JSON-RPC message is not an object".to_string()))?;

    if object.contains_key("method") {
        if object.contains_key("id") {
            Ok(McpMessage::Request(serde_json::from_value(value)?))
        } else {
            Ok(McpMessage::Notification(serde_json::from_value(value)?))
        }
    } else if object.contains_key("id") {
        Ok(McpMessage::Response(serde_json::from_value(value)?))
    } else {
        Err(Error::InvalidInput(
            "invalid JSON-RPC message: missing 'method' and 'id'".to_string(),
        ))
    }
}

/// Tool definition from an MCP server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpTool {
    /// Tool name
    pub name: String,
    /// Tool description
    #[serde(default)]
    pub description: String,
    /// Input schema (JSON Schema)
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

/// Resource provided by an MCP server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpResource {
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Resource template with a URI pattern
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpResourceTemplate {
    #[serde(rename = "uriTemplate")]
    pub uri_template: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Argument accepted by an MCP prompt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpPromptArgument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// Prompt provided by an MCP server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpPrompt {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<McpPromptArgument>>,
}

/// Message in a prompt response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpPromptMessage {
    pub role: String,
    pub content: Value,
}

/// Content block returned by a tool call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpContent {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(rename = "mimeType", default)]
    pub mime_type: Option<String>,
}

/// Result of a tools/call response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolResult {
    #[serde(default)]
    pub content: Vec<McpContent>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl McpToolResult {
    /// Flatten the content blocks to text.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| c.text.clone())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Server capabilities from initialize
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct McpCapabilities {
    pub tools: bool,
    pub resources: bool,
    pub prompts: bool,
    pub logging: bool,
}

impl McpCapabilities {
    /// Build from an initialize result's `capabilities` map: presence of
    /// the key means the capability is offered.
    pub fn from_initialize(result: &Value) -> Self {
        let caps = result.get("capabilities").and_then(Value::as_object);
        match caps {
            Some(caps) => McpCapabilities {
                tools: caps.contains_key("tools"),
                resources: caps.contains_key("resources"),
                prompts: caps.contains_key("prompts"),
                logging: caps.contains_key("logging"),
            },
            None => McpCapabilities::default(),
        }
    }
}

/// Server information from initialize
#[derive(Debug, Clone)]
pub struct McpServerInfo {
    pub name: String,
    pub version: String,
    pub capabilities: McpCapabilities,
}

impl McpServerInfo {
    /// Parse from an initialize result, tolerating missing fields.
    pub fn from_initialize(result: &Value) -> Self {
        let server_info = result.get("serverInfo");
        McpServerInfo {
            name: server_info
                .and_then(|s| s.get("name"))
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            version: server_info
                .and_then(|s| s.get("version"))
                .and_then(Value::as_str)
                .unwrap_or("0.0.0")
                .to_string(),
            capabilities: McpCapabilities::from_initialize(result),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serialization() {
        let request = McpRequest::new(1, "tools/list", None);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], 1);
        assert_eq!(json["method"], "tools/list");
        assert!(json.get("params").is_none());
    }

    #[test]
    fn initialize_request_carries_client_info() {
        let request = McpRequest::initialize(1);
        let params = request.params.unwrap();
        assert_eq!(params["clientInfo"]["name"], crate::NAME);
        assert!(params["protocolVersion"].is_string());
    }

    #[test]
    fn id_accepts_string_or_number() {
        let numeric: JsonRpcId = serde_json::from_value(json!(42)).unwrap();
        assert_eq!(numeric.key(), "42");

        let text: JsonRpcId = serde_json::from_value(json!("abc-1")).unwrap();
        assert_eq!(text.key(), "abc-1");
    }

    #[test]
    fn parse_classifies_messages() {
        let request = parse_message(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})).unwrap();
        assert!(matches!(request, McpMessage::Request(_)));

        let notification =
            parse_message(json!({"jsonrpc": "2.0", "method": "notifications/progress"})).unwrap();
        assert!(matches!(notification, McpMessage::Notification(_)));

        let response = parse_message(json!({"jsonrpc": "2.0", "id": 1, "result": {}})).unwrap();
        assert!(matches!(response, McpMessage::Response(_)));

        assert!(parse_message(json!({"jsonrpc": "2.0"})).is_err());
        assert!(parse_message(json!("not an object")).is_err());
    }

    #[test]
    fn response_error_detection() {
        let response: McpResponse = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32601, "message": "Method not found"},
        }))
        .unwrap();
        assert!(response.is_error());
        assert_eq!(response.error.unwrap().code, -32601);
    }

    #[test]
    fn tool_defaults_for_missing_fields() {
        let tool: McpTool = serde_json::from_value(json!({"name": "query"})).unwrap();
        assert_eq!(tool.name, "query");
        assert!(tool.description.is_empty());
        assert!(tool.input_schema.is_null());
    }

    #[test]
    fn tool_result_text_flattens_blocks() {
        let result: McpToolResult = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "first"},
                {"type": "image", "data": "base64..", "mimeType": "image/png"},
                {"type": "text", "text": "second"},
            ],
        }))
        .unwrap();
        assert_eq!(result.text(), "first\nsecond");
        assert!(!result.is_error);
    }

    #[test]
    fn capabilities_from_presence() {
        let caps = McpCapabilities::from_initialize(&json!({
            "capabilities": {"tools": {}, "logging": {}},
        }));
        assert!(caps.tools);
        assert!(caps.logging);
        assert!(!caps.resources);
        assert!(!caps.prompts);
    }

    #[test]
    fn server_info_tolerates_missing_fields() {
        let info = McpServerInfo::from_initialize(&json!({}));
        assert_eq!(info.name, "unknown");
        assert_eq!(info.version, "0.0.0");
    }

    #[test]
    fn resource_roundtrip_uses_wire_names() {
        let resource = McpResource {
            uri: "file:///a".into(),
            name: "a".into(),
            description: None,
            mime_type: Some("text/plain".into()),
        };
        let json = serde_json::to_value(&resource).unwrap();
        assert_eq!(json["mimeType"], "text/plain");

        let template: McpResourceTemplate = serde_json::from_value(json!({
            "uriTemplate": "file:///{path}",
            "name": "files",
        }))
        .unwrap();
        assert_eq!(template.uri_template, "file:///{path}");
    }
}
