//! Agent module - task model, type catalog, and the executor loop
//!
//! An agent is a bounded task executed by one loop invocation with its
//! own configuration and result. The executor drives the LLM↔tool
//! conversation, enforces resource limits, and emits lifecycle events
//! to the hook bus.

mod catalog;
mod executor;
mod result;
mod types;

pub use catalog::{AgentTypeCatalog, AgentTypeDefinition};
pub use executor::{AgentEvent, AgentExecutor};
pub use result::{AgentResult, AggregatedResult};
pub use types::{AgentConfig, AgentContext, AgentState, AgentTask, AgentUsage};
