//! Permission rule-set evaluation and the confirmation gate.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::models::{PermissionLevel, PermissionRule};
use super::rules::{matches, specificity};
use crate::error::Result;

/// Outcome of evaluating a rule set for one tool call.
#[derive(Debug, Clone)]
pub struct PermissionDecision {
    /// Level to apply
    pub level: PermissionLevel,
    /// The rule that decided, if any
    pub rule: Option<PermissionRule>,
    /// Human-readable reason for the decision
    pub reason: String,
}

/// An ordered set of permission rules with a default level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSet {
    /// Rules in registration order
    #[serde(default)]
    pub rules: Vec<PermissionRule>,
    /// Level applied when no rule matches
    #[serde(default = "default_level")]
    pub default: PermissionLevel,
}

fn default_level() -> PermissionLevel {
    PermissionLevel::Ask
}

impl Default for RuleSet {
    fn default() -> Self {
        RuleSet {
            rules: Vec::new(),
            default: PermissionLevel::Ask,
        }
    }
}

impl RuleSet {
    /// Create an empty rule set with the `ask` default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a rule set with an explicit default level.
    pub fn with_default(default: PermissionLevel) -> Self {
        RuleSet {
            rules: Vec::new(),
            default,
        }
    }

    /// Append a rule.
    pub fn add_rule(&mut self, rule: PermissionRule) {
        self.rules.push(rule);
    }

    /// Remove the first rule with the given pattern. Returns whether a
    /// rule was removed.
    pub fn remove_rule(&mut self, pattern: &str) -> bool {
        match self.rules.iter().position(|r| r.pattern == pattern) {
            Some(index) => {
                self.rules.remove(index);
                true
            }
            None => false,
        }
    }

    /// Find a rule by pattern.
    pub fn get_rule(&self, pattern: &str) -> Option<&PermissionRule> {
        self.rules.iter().find(|r| r.pattern == pattern)
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the set holds no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate the rule set for a tool call.
    ///
    /// Deterministic: equal (tool, category, args, rules) always yield
    /// the same decision. Among matching enabled rules the winner has
    /// the highest (priority, specificity, restrictiveness).
    pub fn evaluate(
        &self,
        tool_name: &str,
        category: Option<&str>,
        args: &Value,
    ) -> PermissionDecision {
        let mut best: Option<(&PermissionRule, i32)> = None;

        for rule in self.rules.iter().filter(|r| r.enabled) {
            if !matches(&rule.pattern, tool_name, category, args) {
                continue;
            }
            let score = specificity(&rule.pattern);
            let better = match best {
                None => true,
                Some((current, current_score)) => {
                    (rule.priority, score, rule.level)
                        > (current.priority, current_score, current.level)
                }
            };
            if better {
                best = Some((rule, score));
            }
        }

        match best {
            Some((rule, _)) => PermissionDecision {
                level: rule.level,
                rule: Some(rule.clone()),
                reason: if rule.description.is_empty() {
                    format!("Matched rule: {}", rule.pattern)
                } else {
                    rule.description.clone()
                },
            },
            None => PermissionDecision {
                level: self.default,
                rule: None,
                reason: format!("No matching rule, default is {}", self.default),
            },
        }
    }

    /// Serialize to a JSON value.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("rule set serialization cannot fail")
    }

    /// Deserialize from a JSON value. Missing fields take defaults.
    pub fn from_value(value: &Value) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }
}

/// Asks the user to confirm an `ask`-level tool call.
///
/// The core exposes this callback interface; the REPL injects its own
/// implementation. Non-interactive runs leave it unset, which is
/// equivalent to denial.
#[async_trait]
pub trait PermissionPrompter: Send + Sync {
    /// Return true to let the call proceed.
    async fn confirm(&self, tool_name: &str, args: &Value, reason: &str) -> bool;
}

/// Rule evaluation plus the interactive confirmation gate.
pub struct PermissionEngine {
    rules: RwLock<RuleSet>,
    prompter: Option<Arc<dyn PermissionPrompter>>,
}

impl PermissionEngine {
    /// Engine with an empty rule set and no prompter.
    pub fn new() -> Self {
        Self::with_rules(RuleSet::new(), None)
    }

    /// Engine with explicit rules and an optional prompter.
    pub fn with_rules(rules: RuleSet, prompter: Option<Arc<dyn PermissionPrompter>>) -> Self {
        PermissionEngine {
            rules: RwLock::new(rules),
            prompter,
        }
    }

    /// Evaluate the current rule set.
    pub fn evaluate(
        &self,
        tool_name: &str,
        category: Option<&str>,
        args: &Value,
    ) -> PermissionDecision {
        self.rules
            .read()
            .expect("permission rules poisoned")
            .evaluate(tool_name, category, args)
    }

    /// Replace the rule set (e.g. after a config reload).
    pub fn set_rules(&self, rules: RuleSet) {
        *self.rules.write().expect("permission rules poisoned") = rules;
    }

    /// Snapshot of the current rule set.
    pub fn rules(&self) -> RuleSet {
        self.rules.read().expect("permission rules poisoned").clone()
    }

    /// Ask the user to confirm. Absent prompter means denial.
    pub async fn prompt(&self, tool_name: &str, args: &Value, reason: &str) -> bool {
        match self.prompter {
            Some(ref prompter) => prompter.confirm(tool_name, args, reason).await,
            None => {
                debug!("No prompter configured, treating ask as denied for {}", tool_name);
                false
            }
        }
    }
}

impl Default for PermissionEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_set_uses_default() {
        let rules = RuleSet::new();
        let decision = rules.evaluate("unknown", None, &json!({}));
        assert_eq!(decision.level, PermissionLevel::Ask);
        assert!(decision.rule.is_none());
        assert!(decision.reason.to_lowercase().contains("default"));
    }

    #[test]
    fn matching_rule_wins() {
        let mut rules = RuleSet::new();
        rules.add_rule(PermissionRule::new("tool:read", PermissionLevel::Allow));

        let decision = rules.evaluate("read", None, &json!({}));
        assert_eq!(decision.level, PermissionLevel::Allow);
        assert_eq!(decision.rule.unwrap().pattern, "tool:read");
    }

    #[test]
    fn disabled_rules_skipped() {
        let mut rules = RuleSet::new();
        rules.add_rule(PermissionRule::new("tool:bash", PermissionLevel::Deny).disabled());

        let decision = rules.evaluate("bash", None, &json!({}));
        assert_eq!(decision.level, PermissionLevel::Ask);
        assert!(decision.rule.is_none());
    }

    #[test]
    fn most_specific_rule_wins() {
        let mut rules = RuleSet::new();
        rules.add_rule(PermissionRule::new("tool:bash", PermissionLevel::Ask));
        rules.add_rule(PermissionRule::new(
            "tool:bash,arg:command:ls",
            PermissionLevel::Allow,
        ));

        let decision = rules.evaluate("bash", None, &json!({"command": "ls"}));
        assert_eq!(decision.level, PermissionLevel::Allow);
    }

    #[test]
    fn higher_priority_wins() {
        let mut rules = RuleSet::new();
        rules.add_rule(PermissionRule::new("tool:bash", PermissionLevel::Allow));
        rules.add_rule(PermissionRule::new("tool:bash", PermissionLevel::Deny).with_priority(10));

        let decision = rules.evaluate("bash", None, &json!({}));
        assert_eq!(decision.level, PermissionLevel::Deny);
    }

    #[test]
    fn restrictive_wins_on_tie() {
        let mut rules = RuleSet::new();
        rules.add_rule(PermissionRule::new("tool:bash", PermissionLevel::Allow));
        rules.add_rule(PermissionRule::new("tool:bash", PermissionLevel::Deny));

        let decision = rules.evaluate("bash", None, &json!({}));
        assert_eq!(decision.level, PermissionLevel::Deny);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let mut rules = RuleSet::new();
        rules.add_rule(PermissionRule::new("tool:bash*", PermissionLevel::Ask));
        rules.add_rule(PermissionRule::new("category:shell", PermissionLevel::Deny));
        rules.add_rule(PermissionRule::new("tool:bash", PermissionLevel::Allow));

        let args = json!({"command": "ls"});
        let first = rules.evaluate("bash", Some("shell"), &args);
        for _ in 0..10 {
            let again = rules.evaluate("bash", Some("shell"), &args);
            assert_eq!(again.level, first.level);
            assert_eq!(
                again.rule.as_ref().map(|r| &r.pattern),
                first.rule.as_ref().map(|r| &r.pattern)
            );
        }
    }

    #[test]
    fn description_used_as_reason() {
        let mut rules = RuleSet::new();
        rules.add_rule(
            PermissionRule::new("tool:bash", PermissionLevel::Ask)
                .with_description("Confirm shell commands"),
        );
        assert_eq!(
            rules.evaluate("bash", None, &json!({})).reason,
            "Confirm shell commands"
        );
    }

    #[test]
    fn pattern_used_as_reason_without_description() {
        let mut rules = RuleSet::new();
        rules.add_rule(PermissionRule::new("tool:bash", PermissionLevel::Ask));
        assert!(rules.evaluate("bash", None, &json!({})).reason.contains("tool:bash"));
    }

    #[test]
    fn add_remove_get() {
        let mut rules = RuleSet::new();
        rules.add_rule(PermissionRule::new("tool:bash", PermissionLevel::Ask));
        assert_eq!(rules.len(), 1);
        assert!(rules.get_rule("tool:bash").is_some());
        assert!(rules.remove_rule("tool:bash"));
        assert!(!rules.remove_rule("tool:bash"));
        assert!(rules.is_empty());
    }

    #[test]
    fn roundtrip_serialization() {
        let mut original = RuleSet::with_default(PermissionLevel::Deny);
        original.add_rule(
            PermissionRule::new("tool:bash,arg:command:*rm*", PermissionLevel::Deny)
                .with_priority(50)
                .with_description("Block rm"),
        );

        let restored = RuleSet::from_value(&original.to_value()).unwrap();
        assert_eq!(restored.default, original.default);
        assert_eq!(restored.rules, original.rules);
    }

    #[test]
    fn from_value_empty_object() {
        let rules = RuleSet::from_value(&json!({})).unwrap();
        assert_eq!(rules.default, PermissionLevel::Ask);
        assert!(rules.is_empty());
    }

    #[tokio::test]
    async fn missing_prompter_denies() {
        let engine = PermissionEngine::new();
        assert!(!engine.prompt("bash", &json!({}), "why").await);
    }

    #[tokio::test]
    async fn prompter_decides() {
        struct Always(bool);

        #[async_trait]
        impl PermissionPrompter for Always {
            async fn confirm(&self, _tool: &str, _args: &Value, _reason: &str) -> bool {
                self.0
            }
        }

        let engine =
            PermissionEngine::with_rules(RuleSet::new(), Some(Arc::new(Always(true))));
        assert!(engine.prompt("bash", &json!({}), "why").await);

        let engine =
            PermissionEngine::with_rules(RuleSet::new(), Some(Arc::new(Always(false))));
        assert!(!engine.prompt("bash", &json!({}), "why").await);
    }
}
