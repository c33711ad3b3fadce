//! Hook event types and payloads.
//!
//! Events are named `category:event`, in five categories: tool, llm,
//! session, permission, and user. A hook subprocess receives the event
//! as environment variables with sanitised values.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Environment variable prefix for hook subprocesses.
const ENV_PREFIX: &str = "RUNTIME_";

/// Maximum sanitised environment value length.
const MAX_ENV_VALUE_LEN: usize = 8192;

/// Enumerated hook event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    // Tool events
    ToolPreExecute,
    ToolPostExecute,
    ToolError,
    // LLM events
    LlmPreRequest,
    LlmPostResponse,
    LlmStreamStart,
    LlmStreamEnd,
    // Session events
    SessionStart,
    SessionEnd,
    SessionMessage,
    // Permission events
    PermissionCheck,
    PermissionPrompt,
    PermissionGranted,
    PermissionDenied,
    // User events
    UserPromptSubmit,
    UserInterrupt,
}

impl EventType {
    /// The `category:event` name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ToolPreExecute => "tool:pre_execute",
            EventType::ToolPostExecute => "tool:post_execute",
            EventType::ToolError => "tool:error",
            EventType::LlmPreRequest => "llm:pre_request",
            EventType::LlmPostResponse => "llm:post_response",
            EventType::LlmStreamStart => "llm:stream_start",
            EventType::LlmStreamEnd => "llm:stream_end",
            EventType::SessionStart => "session:start",
            EventType::SessionEnd => "session:end",
            EventType::SessionMessage => "session:message",
            EventType::PermissionCheck => "permission:check",
            EventType::PermissionPrompt => "permission:prompt",
            EventType::PermissionGranted => "permission:granted",
            EventType::PermissionDenied => "permission:denied",
            EventType::UserPromptSubmit => "user:prompt_submit",
            EventType::UserInterrupt => "user:interrupt",
        }
    }

    /// Category half of the name.
    pub fn category(&self) -> &'static str {
        self.as_str().split(':').next().unwrap_or("")
    }

    /// Whether a non-zero hook exit vetoes the operation.
    pub fn supports_veto(&self) -> bool {
        matches!(self, EventType::ToolPreExecute)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Event data delivered to hooks.
#[derive(Debug, Clone)]
pub struct HookEvent {
    /// The event type
    pub event_type: EventType,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// Free-form event data
    pub data: Map<String, Value>,
    /// Tool name for tool and permission events
    pub tool_name: Option<String>,
    /// Current session id
    pub session_id: Option<String>,
}

impl HookEvent {
    /// Create an event with empty data.
    pub fn new(event_type: EventType) -> Self {
        HookEvent {
            event_type,
            timestamp: Utc::now(),
            data: Map::new(),
            tool_name: None,
            session_id: None,
        }
    }

    /// Builder: attach a tool name.
    pub fn with_tool(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    /// Builder: attach a session id.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Builder: attach a data entry.
    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// The full match name: `category:event[:tool]`.
    pub fn full_name(&self) -> String {
        match self.tool_name {
            Some(ref tool) => format!("{}:{}", self.event_type, tool),
            None => self.event_type.to_string(),
        }
    }

    // Constructors for the common event shapes.

    pub fn tool_pre_execute(tool_name: &str, arguments: &Value) -> Self {
        Self::new(EventType::ToolPreExecute)
            .with_tool(tool_name)
            .with_data("tool_args", arguments.clone())
    }

    pub fn tool_post_execute(tool_name: &str, arguments: &Value, result: Value) -> Self {
        Self::new(EventType::ToolPostExecute)
            .with_tool(tool_name)
            .with_data("tool_args", arguments.clone())
            .with_data("tool_result", result)
    }

    pub fn tool_error(tool_name: &str, arguments: &Value, error: &str) -> Self {
        Self::new(EventType::ToolError)
            .with_tool(tool_name)
            .with_data("tool_args", arguments.clone())
            .with_data("error", Value::String(error.to_string()))
    }

    pub fn llm_pre_request(model: &str, message_count: usize) -> Self {
        Self::new(EventType::LlmPreRequest)
            .with_data("llm_model", Value::String(model.to_string()))
            .with_data("message_count", Value::from(message_count))
    }

    pub fn llm_post_response(model: &str, tokens: u32) -> Self {
        Self::new(EventType::LlmPostResponse)
            .with_data("llm_model", Value::String(model.to_string()))
            .with_data("llm_tokens", Value::from(tokens))
    }

    pub fn llm_stream_start(model: &str) -> Self {
        Self::new(EventType::LlmStreamStart)
            .with_data("llm_model", Value::String(model.to_string()))
    }

    pub fn llm_stream_end(model: &str, tokens: u32) -> Self {
        Self::new(EventType::LlmStreamEnd)
            .with_data("llm_model", Value::String(model.to_string()))
            .with_data("llm_tokens", Value::from(tokens))
    }

    pub fn session_start(session_id: &str) -> Self {
        Self::new(EventType::SessionStart).with_session(session_id)
    }

    pub fn session_end(session_id: &str) -> Self {
        Self::new(EventType::SessionEnd).with_session(session_id)
    }

    pub fn session_message(session_id: &str, role: &str, content: &str) -> Self {
        Self::new(EventType::SessionMessage)
            .with_session(session_id)
            .with_data("message_role", Value::String(role.to_string()))
            .with_data("message_content", Value::String(content.to_string()))
    }

    pub fn permission_check(tool_name: &str, level: &str, rule: Option<&str>) -> Self {
        Self::new(EventType::PermissionCheck)
            .with_tool(tool_name)
            .with_data("perm_level", Value::String(level.to_string()))
            .with_data(
                "perm_rule",
                Value::String(rule.unwrap_or_default().to_string()),
            )
    }

    pub fn permission_prompt(tool_name: &str, level: &str) -> Self {
        Self::new(EventType::PermissionPrompt)
            .with_tool(tool_name)
            .with_data("perm_level", Value::String(level.to_string()))
    }

    pub fn permission_granted(tool_name: &str) -> Self {
        Self::new(EventType::PermissionGranted).with_tool(tool_name)
    }

    pub fn permission_denied(tool_name: &str) -> Self {
        Self::new(EventType::PermissionDenied).with_tool(tool_name)
    }

    pub fn user_prompt_submit(content: &str) -> Self {
        Self::new(EventType::UserPromptSubmit)
            .with_data("user_input", Value::String(content.to_string()))
    }

    pub fn user_interrupt() -> Self {
        Self::new(EventType::UserInterrupt)
    }

    /// Convert the event to environment variables for a hook subprocess.
    ///
    /// All values are sanitised so hooks can interpolate them into shell
    /// commands without breaking the environment block.
    pub fn to_env(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert(
            format!("{}EVENT", ENV_PREFIX),
            sanitize_env_value(self.event_type.as_str()),
        );
        env.insert(
            format!("{}TIMESTAMP", ENV_PREFIX),
            self.timestamp.timestamp().to_string(),
        );

        if let Some(ref session_id) = self.session_id {
            env.insert(
                format!("{}SESSION_ID", ENV_PREFIX),
                sanitize_env_value(session_id),
            );
        }
        if let Some(ref tool_name) = self.tool_name {
            env.insert(
                format!("{}TOOL_NAME", ENV_PREFIX),
                sanitize_env_value(tool_name),
            );
        }

        for (key, value) in &self.data {
            let safe_key: String = key
                .to_uppercase()
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
                .collect();
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            env.insert(
                format!("{}{}", ENV_PREFIX, safe_key),
                sanitize_env_value(&text),
            );
        }

        env
    }

    /// Serialize the event for logging.
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "type": self.event_type.as_str(),
            "timestamp": self.timestamp.to_rfc3339(),
            "data": self.data,
            "tool_name": self.tool_name,
            "session_id": self.session_id,
        })
    }
}

/// Sanitise a value for the environment block: strip NUL, collapse
/// newlines to spaces, cap the length.
fn sanitize_env_value(value: &str) -> String {
    let mut cleaned: String = value
        .chars()
        .filter(|c| *c != '\0' && *c != '\r')
        .map(|c| if c == '\n' { ' ' } else { c })
        .collect();

    if cleaned.chars().count() > MAX_ENV_VALUE_LEN {
        cleaned = cleaned.chars().take(MAX_ENV_VALUE_LEN).collect();
        cleaned.push_str("...[truncated]");
    }
    cleaned
}
