//! Context engine: token counting, truncation strategies, and
//! summarisation compaction.
//!
//! Given a message list and a token budget, produce a (possibly shorter)
//! list that fits, preserving the LLM API's message-pairing invariants
//! and prioritising recency.

mod compaction;
mod strategies;
mod tokens;

pub use compaction::{ContextCompactor, ToolResultCompactor, SUMMARY_PREFIX};
pub use strategies::{
    CompositeStrategy, SelectiveStrategy, SlidingWindowStrategy, SmartTruncationStrategy,
    TokenBudgetStrategy, TruncationStrategy,
};
pub use tokens::{
    counter_for_model, ApproximateCounter, BpeCounter, CacheStats, CachingCounter, TokenCounter,
};
