//! Configuration types for the runtime core.

use std::collections::HashMap;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::agent::AgentConfig;
use crate::context::{
    SelectiveStrategy, SlidingWindowStrategy, SmartTruncationStrategy, TokenBudgetStrategy,
    TruncationStrategy,
};
use crate::llm::ProviderConfig;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Agent loop defaults
    #[serde(default)]
    pub agent: AgentSettings,
    /// LLM provider endpoint
    #[serde(default)]
    pub provider: ProviderSettings,
    /// Context engine settings
    #[serde(default)]
    pub context: ContextSettings,
    /// Shell manager settings
    #[serde(default)]
    pub shell: ShellSettings,
    /// MCP servers to connect, by name
    #[serde(default)]
    pub mcp: HashMap<String, McpServerConfig>,
}

/// Agent loop defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Maximum LLM round-trips per task
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Token budget per task
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u64,
    /// Wall-clock budget per task
    #[serde(with = "humantime_serde", default = "default_max_time")]
    pub max_time: Duration,
    /// Timeout for one LLM round-trip
    #[serde(with = "humantime_serde", default = "default_iteration_timeout")]
    pub iteration_timeout: Duration,
    /// Token budget for the conversation each round-trip
    #[serde(default = "default_context_budget")]
    pub context_budget: usize,
}

fn default_max_iterations() -> u32 {
    20
}
fn default_max_tokens() -> u64 {
    50_000
}
fn default_max_time() -> Duration {
    Duration::from_secs(300)
}
fn default_iteration_timeout() -> Duration {
    Duration::from_secs(120)
}
fn default_context_budget() -> usize {
    32_000
}

impl Default for AgentSettings {
    fn default() -> Self {
        AgentSettings {
            max_iterations: default_max_iterations(),
            max_tokens: default_max_tokens(),
            max_time: default_max_time(),
            iteration_timeout: default_iteration_timeout(),
            context_budget: default_context_budget(),
        }
    }
}

impl AgentSettings {
    /// Build an agent configuration for a named type from these
    /// defaults.
    pub fn to_agent_config(&self, agent_type: impl Into<String>) -> AgentConfig {
        AgentConfig {
            agent_type: agent_type.into(),
            max_iterations: self.max_iterations,
            max_tokens: self.max_tokens,
            max_time: self.max_time,
            iteration_timeout: self.iteration_timeout,
            context_budget: self.context_budget,
            ..AgentConfig::default()
        }
    }
}

/// LLM provider endpoint settings. The API key is optional in files
/// (usually supplied via the environment) but required to build a
/// client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// API key (prefer `RUNTIME_PROVIDER__API_KEY` over files).
    /// Never serialized back out.
    #[serde(default, skip_serializing)]
    pub api_key: Option<SecretString>,
    /// Base URL of the chat-completions endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Whole-request timeout
    #[serde(with = "humantime_serde", default = "default_provider_timeout")]
    pub timeout: Duration,
    /// Retry attempts for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}
fn default_model() -> String {
    "anthropic/claude-sonnet-4".to_string()
}
fn default_provider_timeout() -> Duration {
    Duration::from_secs(120)
}
fn default_max_retries() -> u32 {
    3
}

impl Default for ProviderSettings {
    fn default() -> Self {
        ProviderSettings {
            api_key: None,
            base_url: default_base_url(),
            default_model: default_model(),
            timeout: default_provider_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

impl ProviderSettings {
    /// Build a client configuration; fails without an API key.
    pub fn to_provider_config(&self) -> crate::Result<ProviderConfig> {
        let api_key = self
            .api_key
            .clone()
            .ok_or_else(|| crate::Error::Config("provider.api_key is not set".to_string()))?;
        Ok(ProviderConfig {
            api_key,
            base_url: self.base_url.clone(),
            default_model: self.default_model.clone(),
            timeout: self.timeout,
            max_retries: self.max_retries,
        })
    }
}

/// Context engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSettings {
    /// Truncation strategy to apply
    #[serde(default)]
    pub strategy: StrategyKind,
    /// Window size for the sliding-window strategy
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Messages kept at the front by smart truncation
    #[serde(default = "default_preserve_first")]
    pub preserve_first: usize,
    /// Messages kept at the tail by smart truncation / compaction
    #[serde(default = "default_preserve_last")]
    pub preserve_last: usize,
    /// Per-tool-result token cap
    #[serde(default = "default_max_result_tokens")]
    pub max_result_tokens: usize,
}

fn default_window_size() -> usize {
    50
}
fn default_preserve_first() -> usize {
    2
}
fn default_preserve_last() -> usize {
    10
}
fn default_max_result_tokens() -> usize {
    2000
}

impl Default for ContextSettings {
    fn default() -> Self {
        ContextSettings {
            strategy: StrategyKind::default(),
            window_size: default_window_size(),
            preserve_first: default_preserve_first(),
            preserve_last: default_preserve_last(),
            max_result_tokens: default_max_result_tokens(),
        }
    }
}

/// Which truncation strategy the executor uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    SlidingWindow,
    TokenBudget,
    Smart,
    Selective,
}

impl Default for StrategyKind {
    fn default() -> Self {
        StrategyKind::Smart
    }
}

impl ContextSettings {
    /// Instantiate the configured truncation strategy.
    pub fn build_strategy(&self) -> Box<dyn TruncationStrategy> {
        match self.strategy {
            StrategyKind::SlidingWindow => {
                Box::new(SlidingWindowStrategy::new(self.window_size, true))
            }
            StrategyKind::TokenBudget => Box::new(TokenBudgetStrategy::default()),
            StrategyKind::Smart => Box::new(SmartTruncationStrategy::new(
                self.preserve_first,
                self.preserve_last,
                true,
            )),
            StrategyKind::Selective => Box::new(SelectiveStrategy::default()),
        }
    }
}

/// Shell manager settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellSettings {
    /// Grace window before completed shells are evicted
    #[serde(with = "humantime_serde", default = "default_cleanup_max_age")]
    pub cleanup_max_age: Duration,
    /// Default foreground command timeout
    #[serde(with = "humantime_serde", default = "default_command_timeout")]
    pub command_timeout: Duration,
}

fn default_cleanup_max_age() -> Duration {
    Duration::from_secs(3600)
}
fn default_command_timeout() -> Duration {
    Duration::from_secs(120)
}

impl Default for ShellSettings {
    fn default() -> Self {
        ShellSettings {
            cleanup_max_age: default_cleanup_max_age(),
            command_timeout: default_command_timeout(),
        }
    }
}

/// One configured MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum McpServerConfig {
    /// Child process speaking line-delimited JSON
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// HTTP endpoint, optionally with an SSE stream
    Http {
        url: String,
        #[serde(default)]
        sse: bool,
    },
}
