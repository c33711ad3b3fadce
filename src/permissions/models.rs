//! Permission levels and rules.

use serde::{Deserialize, Serialize};

/// What the runtime may do with a matching tool call.
///
/// Ordering is by restrictiveness: `Deny > Ask > Allow`, used to break
/// ties between rules with equal priority and specificity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    /// Proceed without asking
    Allow,
    /// Ask the user before proceeding
    Ask,
    /// Refuse the call
    Deny,
}

impl std::fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionLevel::Allow => write!(f, "allow"),
            PermissionLevel::Ask => write!(f, "ask"),
            PermissionLevel::Deny => write!(f, "deny"),
        }
    }
}

/// A single permission rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionRule {
    /// Pattern the rule matches (see the pattern grammar)
    pub pattern: String,
    /// Level applied when the rule matches
    pub level: PermissionLevel,
    /// Higher priority wins over lower
    #[serde(default)]
    pub priority: i32,
    /// Disabled rules are skipped during evaluation
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Shown to the user as the reason for the decision
    #[serde(default)]
    pub description: String,
}

fn default_enabled() -> bool {
    true
}

impl PermissionRule {
    /// Create an enabled rule with default priority.
    pub fn new(pattern: impl Into<String>, level: PermissionLevel) -> Self {
        PermissionRule {
            pattern: pattern.into(),
            level,
            priority: 0,
            enabled: true,
            description: String::new(),
        }
    }

    /// Builder: set the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Builder: set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Builder: disable the rule.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restrictiveness_ordering() {
        assert!(PermissionLevel::Deny > PermissionLevel::Ask);
        assert!(PermissionLevel::Ask > PermissionLevel::Allow);
    }

    #[test]
    fn level_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&PermissionLevel::Deny).unwrap(),
            "\"deny\""
        );
        let level: PermissionLevel = serde_json::from_str("\"ask\"").unwrap();
        assert_eq!(level, PermissionLevel::Ask);
    }

    #[test]
    fn rule_roundtrip() {
        let rule = PermissionRule::new("tool:bash,arg:command:*rm*", PermissionLevel::Deny)
            .with_priority(50)
            .with_description("Block rm");

        let json = serde_json::to_string(&rule).unwrap();
        let back: PermissionRule = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rule);
    }

    #[test]
    fn rule_defaults_from_minimal_json() {
        let rule: PermissionRule =
            serde_json::from_str(r#"{"pattern": "tool:read", "level": "allow"}"#).unwrap();
        assert!(rule.enabled);
        assert_eq!(rule.priority, 0);
        assert!(rule.description.is_empty());
    }
}
