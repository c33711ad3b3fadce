//! Chat-completions wire types shared by the executor and providers.

use serde::{Deserialize, Serialize};

/// Role of a message in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System message providing context and instructions
    System,
    /// User message
    User,
    /// Assistant (AI) response
    Assistant,
    /// Tool/function result
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// Message content: plain text or an ordered sequence of typed parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text body
    Text(String),
    /// Multi-part body (text, images, binary references)
    Parts(Vec<ContentPart>),
}

/// One part of a multi-part message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Text fragment
    Text { text: String },
    /// Image addressed by URL
    ImageUrl { url: String },
    /// Opaque binary reference (id plus MIME type)
    Binary { id: String, mime_type: String },
}

impl MessageContent {
    /// Flatten the content to text. Non-text parts contribute a short
    /// placeholder so token estimates stay non-zero.
    pub fn as_text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => text.clone(),
                    ContentPart::ImageUrl { url } => format!("[image: {}]", url),
                    ContentPart::Binary { id, mime_type } => {
                        format!("[binary {} ({})]", id, mime_type)
                    }
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Whether the content carries no text at all.
    pub fn is_empty(&self) -> bool {
        match self {
            MessageContent::Text(text) => text.is_empty(),
            MessageContent::Parts(parts) => parts.is_empty(),
        }
    }
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Text(String::new())
    }
}

impl From<&str> for MessageContent {
    fn from(s: &str) -> Self {
        MessageContent::Text(s.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(s: String) -> Self {
        MessageContent::Text(s)
    }
}

/// A message in a conversation.
///
/// Messages are treated as immutable once appended to a conversation;
/// the context engine builds new lists instead of editing in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender
    pub role: Role,
    /// Content of the message
    #[serde(default)]
    pub content: MessageContent,
    /// Optional name (for tool messages)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
    /// Tool call this message responds to (tool messages only)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tool_call_id: Option<String>,
    /// Tool calls requested by the assistant
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
    /// Marks the message as exempt from selective truncation.
    /// Runtime-local; never serialized to the wire.
    #[serde(skip)]
    pub preserve: bool,
}

impl Message {
    /// Create a new system message
    pub fn system(content: impl Into<MessageContent>) -> Self {
        Message {
            role: Role::System,
            content: content.into(),
            name: None,
            tool_call_id: None,
            tool_calls: None,
            preserve: false,
        }
    }

    /// Create a new user message
    pub fn user(content: impl Into<MessageContent>) -> Self {
        Message {
            role: Role::User,
            content: content.into(),
            name: None,
            tool_call_id: None,
            tool_calls: None,
            preserve: false,
        }
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<MessageContent>) -> Self {
        Message {
            role: Role::Assistant,
            content: content.into(),
            name: None,
            tool_call_id: None,
            tool_calls: None,
            preserve: false,
        }
    }

    /// Create an assistant message carrying tool calls
    pub fn assistant_with_tool_calls(
        content: impl Into<MessageContent>,
        tool_calls: Vec<ToolCallRequest>,
    ) -> Self {
        Message {
            role: Role::Assistant,
            content: content.into(),
            name: None,
            tool_call_id: None,
            tool_calls: Some(tool_calls),
            preserve: false,
        }
    }

    /// Create a new tool result message
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<MessageContent>) -> Self {
        Message {
            role: Role::Tool,
            content: content.into(),
            name: None,
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: None,
            preserve: false,
        }
    }

    /// Mark the message as preserved during selective truncation.
    pub fn preserved(mut self) -> Self {
        self.preserve = true;
        self
    }

    /// Text view of the content.
    pub fn text(&self) -> String {
        self.content.as_text()
    }
}

/// Tool call requested by the assistant.
///
/// The id is produced by the model and correlates the later tool result
/// message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Unique ID for this tool call
    pub id: String,
    /// Type of tool call (always "function" today)
    #[serde(rename = "type")]
    pub call_type: String,
    /// Function details
    pub function: FunctionCall,
}

impl ToolCallRequest {
    /// Build a function-type call request.
    pub fn function(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        ToolCallRequest {
            id: id.into(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// Function call details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Name of the function to call
    pub name: String,
    /// Arguments as a JSON string
    pub arguments: String,
}

/// Tool definition for function calling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Type of tool (always "function" today)
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function definition
    pub function: FunctionDefinition,
}

/// Function definition for tools
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    /// Name of the function
    pub name: String,
    /// Description of what the function does
    pub description: String,
    /// JSON Schema for function parameters
    pub parameters: serde_json::Value,
}

/// Tool choice strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
    /// "auto" / "none"
    Mode(String),
    /// Force a specific tool
    Specific {
        #[serde(rename = "type")]
        tool_type: String,
        function: FunctionName,
    },
}

/// Function name for specific tool choice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionName {
    /// Name of the function to call
    pub name: String,
}

/// Request body for the chat-completions endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    /// Model to use
    pub model: String,
    /// Messages in the conversation
    pub messages: Vec<Message>,
    /// Maximum tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Top-p sampling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Frequency penalty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    /// Presence penalty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    /// Stop sequences
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    /// Whether to stream responses
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    /// Available tools/functions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    /// Tool choice strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    /// Prompt transforms (router-specific)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transforms: Option<Vec<String>>,
    /// Routing preference (router-specific)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
}

/// Response from the chat-completions endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionResponse {
    /// Unique ID for this completion
    pub id: String,
    /// Creation timestamp
    #[serde(default)]
    pub created: u64,
    /// Model used
    pub model: String,
    /// Upstream provider, when routed
    #[serde(default)]
    pub provider: Option<String>,
    /// Completion choices
    pub choices: Vec<Choice>,
    /// Usage statistics
    pub usage: Option<Usage>,
}

/// A completion choice
#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    /// Index of this choice
    pub index: u32,
    /// The generated message
    pub message: Message,
    /// Reason for stopping
    pub finish_reason: Option<String>,
}

/// Token usage statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt
    pub prompt_tokens: u32,
    /// Tokens in the completion
    pub completion_tokens: u32,
    /// Total tokens used
    pub total_tokens: u32,
}

impl Usage {
    /// Sum another usage report into this one.
    pub fn accumulate(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Streaming response chunk
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionChunk {
    /// Unique ID
    pub id: String,
    /// Model used
    #[serde(default)]
    pub model: String,
    /// Delta choices
    pub choices: Vec<ChunkChoice>,
    /// Usage statistics (final chunk on some providers)
    #[serde(default)]
    pub usage: Option<Usage>,
}

/// A streaming choice delta
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkChoice {
    /// Index of this choice
    pub index: u32,
    /// The delta content
    pub delta: MessageDelta,
    /// Reason for stopping
    pub finish_reason: Option<String>,
}

/// Delta content in a streaming response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageDelta {
    /// Role (only in first chunk)
    #[serde(default)]
    pub role: Option<Role>,
    /// Content delta
    #[serde(default)]
    pub content: Option<String>,
    /// Tool calls delta
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

/// Tool call fragment in a streaming response
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallDelta {
    /// Index of the tool call being assembled
    pub index: u32,
    /// Tool call ID (only in first fragment)
    #[serde(default)]
    pub id: Option<String>,
    /// Type (only in first fragment)
    #[serde(rename = "type", default)]
    pub call_type: Option<String>,
    /// Function delta
    #[serde(default)]
    pub function: Option<FunctionDelta>,
}

/// Function fragment in a streaming response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FunctionDelta {
    /// Function name (only in first fragment)
    #[serde(default)]
    pub name: Option<String>,
    /// Arguments delta
    #[serde(default)]
    pub arguments: Option<String>,
}

/// Generation options for chat completions
#[derive(Debug, Clone, Default)]
pub struct GenerationOptions {
    /// Model override (None = provider default)
    pub model: Option<String>,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0 - 2.0)
    pub temperature: Option<f32>,
    /// Top-p sampling (0.0 - 1.0)
    pub top_p: Option<f32>,
    /// Frequency penalty
    pub frequency_penalty: Option<f32>,
    /// Presence penalty
    pub presence_penalty: Option<f32>,
    /// Stop sequences
    pub stop: Option<Vec<String>>,
}

impl GenerationOptions {
    /// Create options for precise, deterministic output
    pub fn precise() -> Self {
        GenerationOptions {
            temperature: Some(0.0),
            ..Default::default()
        }
    }

    /// Create options for balanced output
    pub fn balanced() -> Self {
        GenerationOptions {
            temperature: Some(0.5),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors() {
        let sys = Message::system("be helpful");
        assert_eq!(sys.role, Role::System);
        assert_eq!(sys.text(), "be helpful");

        let tool = Message::tool("call_1", "output");
        assert_eq!(tool.role, Role::Tool);
        assert_eq!(tool.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn multipart_content_flattens() {
        let content = MessageContent::Parts(vec![
            ContentPart::Text {
                text: "look at".into(),
            },
            ContentPart::ImageUrl {
                url: "https://example.com/x.png".into(),
            },
        ]);
        let text = content.as_text();
        assert!(text.contains("look at"));
        assert!(text.contains("example.com"));
    }

    #[test]
    fn message_serialization_matches_wire_shape() {
        let msg = Message::assistant_with_tool_calls(
            "",
            vec![ToolCallRequest::function("call_1", "read_file", "{\"path\":\"a\"}")],
        );
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["tool_calls"][0]["id"], "call_1");
        assert_eq!(json["tool_calls"][0]["type"], "function");
        assert_eq!(json["tool_calls"][0]["function"]["name"], "read_file");
        // Runtime-local flag never reaches the wire
        assert!(json.get("preserve").is_none());
    }

    #[test]
    fn message_roundtrip() {
        let msg = Message::tool("call_9", "result text");
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn usage_accumulates() {
        let mut total = Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        };
        total.accumulate(&Usage {
            prompt_tokens: 20,
            completion_tokens: 10,
            total_tokens: 30,
        });
        assert_eq!(total.total_tokens, 45);
    }

    #[test]
    fn generation_options_presets() {
        assert_eq!(GenerationOptions::precise().temperature, Some(0.0));
        assert_eq!(GenerationOptions::balanced().temperature, Some(0.5));
    }
}
