//! Agent task model: configuration, context, lifecycle state, and usage.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::llm::{GenerationOptions, Message};

/// Lifecycle state of an agent task.
///
/// Transitions are monotonic: `Pending → Running → terminal`, and a
/// terminal state never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl AgentState {
    /// Whether the state is terminal.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AgentState::Pending | AgentState::Running)
    }

    /// Whether a transition to `next` is legal.
    pub fn can_transition(&self, next: AgentState) -> bool {
        match self {
            AgentState::Pending => next == AgentState::Running || next.is_terminal(),
            AgentState::Running => next.is_terminal(),
            _ => false,
        }
    }
}

/// Configuration for one agent execution.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Agent type (looked up in the type catalog)
    pub agent_type: String,
    /// Maximum LLM round-trips
    pub max_iterations: u32,
    /// Token budget across the whole run
    pub max_tokens: u64,
    /// Wall-clock budget across the whole run
    pub max_time: Duration,
    /// Timeout for a single LLM round-trip
    pub iteration_timeout: Duration,
    /// Tool allow-list (None = every registered tool)
    pub tools: Option<Vec<String>>,
    /// Preferred model (None = provider default)
    pub model: Option<String>,
    /// Extra instructions appended to the type's prompt template
    pub prompt_addition: Option<String>,
    /// Fold the parent's trailing messages into the conversation
    pub inherit_context: bool,
    /// Token budget for the conversation sent each round-trip
    pub context_budget: usize,
    /// Sampling options forwarded to the provider
    pub generation: GenerationOptions,
}

impl AgentConfig {
    /// Configuration for a named agent type with library defaults.
    pub fn for_type(agent_type: impl Into<String>) -> Self {
        AgentConfig {
            agent_type: agent_type.into(),
            ..Default::default()
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            agent_type: "general".to_string(),
            max_iterations: 20,
            max_tokens: 50_000,
            max_time: Duration::from_secs(300),
            iteration_timeout: Duration::from_secs(120),
            tools: None,
            model: None,
            prompt_addition: None,
            inherit_context: false,
            context_budget: 32_000,
            generation: GenerationOptions::balanced(),
        }
    }
}

/// Context an agent inherits from its spawner.
#[derive(Debug, Clone)]
pub struct AgentContext {
    /// Trailing messages from the parent conversation
    pub parent_messages: Vec<Message>,
    /// Working directory for tools
    pub working_dir: PathBuf,
    /// Environment overlay for spawned processes
    pub env: HashMap<String, String>,
    /// Free-form metadata carried into the result
    pub metadata: Map<String, Value>,
}

impl Default for AgentContext {
    fn default() -> Self {
        AgentContext {
            parent_messages: Vec::new(),
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env: HashMap::new(),
            metadata: Map::new(),
        }
    }
}

/// Usage counters accumulated during a run.
#[derive(Debug, Clone, Copy, Default)]
pub struct AgentUsage {
    /// Tokens reported by the provider (or estimated when omitted)
    pub tokens_used: u64,
    /// Wall time in seconds
    pub time_seconds: f64,
    /// Number of tool invocations
    pub tool_calls: u32,
}

/// A bounded task executed by one loop invocation.
pub struct AgentTask {
    /// Unique task id
    pub id: Uuid,
    /// Spawning task, for nested agents
    pub parent_id: Option<Uuid>,
    /// The user's task text
    pub task: String,
    /// Execution configuration
    pub config: AgentConfig,
    /// Inherited context
    pub context: AgentContext,
    /// Lifecycle state
    pub state: AgentState,
    /// Usage counters (owned by the executor during the run)
    pub usage: AgentUsage,
    /// Conversation messages built up by the executor
    pub messages: Vec<Message>,
    /// Cancellation token shared with tools and the LLM transport
    pub cancel: CancelToken,
}

impl AgentTask {
    /// Create a pending task.
    pub fn new(task: impl Into<String>, config: AgentConfig) -> Self {
        AgentTask {
            id: Uuid::new_v4(),
            parent_id: None,
            task: task.into(),
            config,
            context: AgentContext::default(),
            state: AgentState::Pending,
            usage: AgentUsage::default(),
            messages: Vec::new(),
            cancel: CancelToken::new(),
        }
    }

    /// Builder: attach a context.
    pub fn with_context(mut self, context: AgentContext) -> Self {
        self.context = context;
        self
    }

    /// Builder: record the spawning task.
    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Request cancellation. Idempotent and irreversible.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Move to a new state if the transition is legal; illegal
    /// transitions are ignored so terminal states stay terminal.
    pub fn set_state(&mut self, next: AgentState) {
        if self.state.can_transition(next) {
            self.state = next;
        }
    }
}
