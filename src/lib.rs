//! # OpenForge
//!
//! An autonomous coding-assistant runtime built with Rust.
//!
//! OpenForge is the coordination engine that sits behind a REPL or other
//! front-end: it drives the LLM↔tool conversation loop, keeps the token
//! budget bounded, dispatches tool calls through permission and hook
//! gates, supervises background shell processes, and federates external
//! tools over the Model Context Protocol.
//!
//! ## Architecture
//!
//! - **Agent** (`agent`): task model, agent-type catalog, and the
//!   executor loop that owns conversation state
//! - **LLM** (`llm`): chat-completions wire types, the `LlmProvider`
//!   trait, and the HTTP client with streaming and retry
//! - **Context** (`context`): token counting, truncation strategies, and
//!   summarisation compaction
//! - **Tools** (`tools`): registry, schema validation, the dispatch
//!   pipeline, and the background shell manager
//! - **Permissions** (`permissions`): rule evaluation and the interactive
//!   confirmation gate
//! - **Hooks** (`hooks`): lifecycle event bus for subprocess hooks and
//!   in-process handlers
//! - **Plugins** (`plugins`): manifest loading and prefix-scoped
//!   registration of plugin contributions
//! - **MCP** (`mcp`): JSON-RPC client over stdio/HTTP/SSE transports
//! - **Configuration** (`config`): layered settings with environment
//!   overrides
//!
//! ## Design Principles
//!
//! 1. **Trait-based abstraction**: providers, tools, transports, and
//!    prompters are traits so front-ends and tests can swap them
//! 2. **Errors as data**: tool failures become tool messages the model
//!    can react to; only loop-level limits end a task
//! 3. **No lock across await**: shared registries are locked briefly and
//!    iterated on snapshots
//! 4. **Everything observable**: every LLM round-trip and tool call emits
//!    events to the hook bus

// Agent task model and executor loop
pub mod agent;

// Cancellation primitive shared across the runtime
pub mod cancel;

// Modular configuration
pub mod config;

// Context engine: token counting, truncation, compaction
pub mod context;

// Error types
pub mod error;

// Hook event bus
pub mod hooks;

// LLM wire types, provider trait, and HTTP client
pub mod llm;

// MCP client and transports
pub mod mcp;

// Permission rules and evaluation
pub mod permissions;

// Plugin manifests and registry
pub mod plugins;

// Tool registry, dispatch, and shell manager
pub mod tools;

// Re-export commonly used items
pub use error::{Error, Result};

// Re-export the types most front-ends need
pub use agent::{AgentConfig, AgentResult, AgentState, AgentTask};
pub use cancel::CancelToken;
pub use llm::{LlmProvider, LlmResponse, Message, Role};
pub use tools::{Tool, ToolRegistry, ToolResult};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");
