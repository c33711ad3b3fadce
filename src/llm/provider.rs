//! LLM provider trait - abstract interface for chat-completions backends.
//!
//! The executor talks to this trait only, which keeps it testable with
//! scripted fakes and lets deployments swap backends without touching the
//! loop.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use super::types::{
    ChatCompletionResponse, GenerationOptions, Message, ToolCallRequest, ToolDefinition, Usage,
};
use crate::error::Result;

/// Parsed provider response, flattened to the first choice.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// Provider-assigned response id
    pub id: String,
    /// Model that produced the response
    pub model: String,
    /// Assistant text content (may be empty when tool calls are present)
    pub content: String,
    /// Finish reason reported by the provider
    pub finish_reason: Option<String>,
    /// Tool calls requested by the model
    pub tool_calls: Vec<ToolCallRequest>,
    /// Token usage for this round-trip
    pub usage: Option<Usage>,
}

impl LlmResponse {
    /// Whether the model requested any tool calls.
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Flatten a wire response into the first choice.
    pub fn from_completion(response: ChatCompletionResponse) -> Self {
        let (content, finish_reason, tool_calls) = match response.choices.into_iter().next() {
            Some(choice) => (
                choice.message.content.as_text(),
                choice.finish_reason,
                choice.message.tool_calls.unwrap_or_default(),
            ),
            None => (String::new(), None, Vec::new()),
        };

        LlmResponse {
            id: response.id,
            model: response.model,
            content,
            finish_reason,
            tool_calls,
            usage: response.usage,
        }
    }
}

/// One event from a streaming generation.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A fragment of assistant text
    Content(String),
    /// The stream finished; carries the fully assembled response
    Done(LlmResponse),
}

/// Stream of generation events
pub type LlmStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Abstract interface for LLM providers.
///
/// Implementations handle authentication, request formatting, response
/// parsing, and transport-level retry.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Get the default model for this provider
    fn default_model(&self) -> &str;

    /// Generate a response (non-streaming)
    async fn generate(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        options: &GenerationOptions,
    ) -> Result<LlmResponse>;

    /// Generate a streaming response.
    ///
    /// The stream yields `Content` fragments whose concatenation equals
    /// the final response content, followed by exactly one `Done` event.
    async fn generate_stream(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        options: &GenerationOptions,
    ) -> Result<LlmStream>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::{Choice, MessageContent, Role};

    #[test]
    fn from_completion_takes_first_choice() {
        let response = ChatCompletionResponse {
            id: "resp_1".into(),
            created: 0,
            model: "test-model".into(),
            provider: None,
            choices: vec![Choice {
                index: 0,
                message: Message {
                    role: Role::Assistant,
                    content: MessageContent::Text("hello".into()),
                    name: None,
                    tool_call_id: None,
                    tool_calls: None,
                    preserve: false,
                },
                finish_reason: Some("stop".into()),
            }],
            usage: Some(Usage {
                prompt_tokens: 3,
                completion_tokens: 2,
                total_tokens: 5,
            }),
        };

        let parsed = LlmResponse::from_completion(response);
        assert_eq!(parsed.content, "hello");
        assert_eq!(parsed.finish_reason.as_deref(), Some("stop"));
        assert!(!parsed.has_tool_calls());
        assert_eq!(parsed.usage.unwrap().total_tokens, 5);
    }

    #[test]
    fn from_completion_empty_choices() {
        let response = ChatCompletionResponse {
            id: "resp_2".into(),
            created: 0,
            model: "test-model".into(),
            provider: None,
            choices: vec![],
            usage: None,
        };

        let parsed = LlmResponse::from_completion(response);
        assert!(parsed.content.is_empty());
        assert!(parsed.finish_reason.is_none());
    }
}
