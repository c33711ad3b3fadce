//! LLM interaction: wire types, the provider abstraction, and the
//! chat-completions HTTP client.

mod client;
mod provider;
mod types;

pub use client::{ChatCompletionsClient, ProviderConfig, StreamAssembler};
pub use provider::{LlmProvider, LlmResponse, LlmStream, StreamEvent};
pub use types::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, Choice, ChunkChoice,
    ContentPart, FunctionCall, FunctionDefinition, FunctionDelta, FunctionName, GenerationOptions,
    Message, MessageContent, MessageDelta, Role, ToolCallDelta, ToolCallRequest, ToolChoice,
    ToolDefinition, Usage,
};
