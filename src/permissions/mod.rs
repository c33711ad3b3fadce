//! Permission engine: rule evaluation and the interactive confirmation
//! gate that every tool call passes through.

mod engine;
mod models;
mod rules;

pub use engine::{PermissionDecision, PermissionEngine, PermissionPrompter, RuleSet};
pub use models::{PermissionLevel, PermissionRule};
pub use rules::{matches, parse_pattern, specificity, ClauseKind, PatternClause};
