//! Agent type catalog.
//!
//! Built-in agent variants differ only in their prompt template and
//! defaults, so a type is a definition struct, not a subclass: the
//! executor looks the definition up by name at run time. Plugins may
//! register custom types under a `<plugin>:` prefix.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;

use serde_json::{json, Value};

use crate::error::{Error, Result};

/// Definition of an agent type.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentTypeDefinition {
    /// Type identifier
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// System prompt template for this type
    pub prompt_template: String,
    /// Tools available (None = all registered tools)
    pub default_tools: Option<Vec<String>>,
    /// Default token budget
    pub default_max_tokens: u64,
    /// Default wall-clock budget
    pub default_max_time: Duration,
    /// Preferred model (None = session default)
    pub default_model: Option<String>,
}

impl AgentTypeDefinition {
    /// Serialise for listings and plugin introspection.
    pub fn to_value(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "prompt_template": self.prompt_template,
            "default_tools": self.default_tools,
            "default_max_tokens": self.default_max_tokens,
            "default_max_time_seconds": self.default_max_time.as_secs(),
            "default_model": self.default_model,
        })
    }
}

fn explore_agent() -> AgentTypeDefinition {
    AgentTypeDefinition {
        name: "explore".to_string(),
        description: "Explores the codebase to answer questions".to_string(),
        prompt_template: "\
You are an exploration agent specialized in navigating codebases.

Search for files, read code, and identify patterns to answer the given
question. Be thorough but efficient, and focus on relevant information.

Return structured findings with file paths, relevant snippets, key
observations, and a summary."
            .to_string(),
        default_tools: Some(vec!["read_file".to_string(), "bash".to_string()]),
        default_max_tokens: 30_000,
        default_max_time: Duration::from_secs(180),
        default_model: None,
    }
}

fn plan_agent() -> AgentTypeDefinition {
    AgentTypeDefinition {
        name: "plan".to_string(),
        description: "Creates implementation plans".to_string(),
        prompt_template: "\
You are a planning agent specialized in software architecture.

Analyze the codebase and produce a detailed implementation plan for the
given task: explore the existing structure first, identify affected files
and modules, consider dependencies, and break the work into concrete
steps.

Return a plan with a summary of the approach, numbered steps with file
references, dependencies between steps, and success criteria."
            .to_string(),
        default_tools: Some(vec!["read_file".to_string(), "bash".to_string()]),
        default_max_tokens: 40_000,
        default_max_time: Duration::from_secs(240),
        default_model: None,
    }
}

fn code_review_agent() -> AgentTypeDefinition {
    AgentTypeDefinition {
        name: "code-review".to_string(),
        description: "Reviews code changes for issues".to_string(),
        prompt_template: "\
You are a code review agent specialized in finding issues.

Analyze the code for bugs, security problems, performance issues, and
clarity. Read the relevant code carefully and check for common bug
patterns.

Return findings categorized by severity with file and line references,
an explanation of each issue, suggested fixes where applicable, and an
overall assessment."
            .to_string(),
        default_tools: Some(vec![
            "read_file".to_string(),
            "bash".to_string(),
            "bash_output".to_string(),
        ]),
        default_max_tokens: 40_000,
        default_max_time: Duration::from_secs(300),
        default_model: None,
    }
}

fn general_agent() -> AgentTypeDefinition {
    AgentTypeDefinition {
        name: "general".to_string(),
        description: "General purpose agent for any task".to_string(),
        prompt_template: "\
You are a general purpose coding agent.

Complete the assigned work using the available tools. Understand the
task fully before acting, use the right tool for each step, handle
errors gracefully, and verify your work when possible.

Report what was accomplished, details of changes made, and any issues
encountered."
            .to_string(),
        default_tools: None,
        default_max_tokens: 50_000,
        default_max_time: Duration::from_secs(300),
        default_model: None,
    }
}

/// Registry of available agent types.
pub struct AgentTypeCatalog {
    types: RwLock<BTreeMap<String, AgentTypeDefinition>>,
}

static GLOBAL: OnceLock<Arc<AgentTypeCatalog>> = OnceLock::new();

impl AgentTypeCatalog {
    /// Create a catalog seeded with the built-in types.
    pub fn new() -> Self {
        let catalog = AgentTypeCatalog {
            types: RwLock::new(BTreeMap::new()),
        };
        catalog.register_builtins();
        catalog
    }

    /// Process-wide catalog.
    pub fn global() -> Arc<AgentTypeCatalog> {
        GLOBAL
            .get_or_init(|| Arc::new(AgentTypeCatalog::new()))
            .clone()
    }

    /// Restore the global catalog to the built-ins. Test hook only.
    pub fn reset_for_test() {
        if let Some(global) = GLOBAL.get() {
            let mut types = global.types.write().expect("agent catalog poisoned");
            types.clear();
            drop(types);
            global.register_builtins();
        }
    }

    fn register_builtins(&self) {
        let mut types = self.types.write().expect("agent catalog poisoned");
        for definition in [
            explore_agent(),
            plan_agent(),
            code_review_agent(),
            general_agent(),
        ] {
            types.insert(definition.name.clone(), definition);
        }
    }

    /// Register a type. Duplicate names are rejected.
    pub fn register(&self, definition: AgentTypeDefinition) -> Result<()> {
        let mut types = self.types.write().expect("agent catalog poisoned");
        if types.contains_key(&definition.name) {
            return Err(Error::InvalidInput(format!(
                "agent type already registered: {}",
                definition.name
            )));
        }
        types.insert(definition.name.clone(), definition);
        Ok(())
    }

    /// Remove a type by name. Returns whether it existed.
    pub fn unregister(&self, name: &str) -> bool {
        self.types
            .write()
            .expect("agent catalog poisoned")
            .remove(name)
            .is_some()
    }

    /// Remove every type whose name starts with a prefix. Returns the
    /// count removed (used when unloading a plugin).
    pub fn unregister_prefixed(&self, prefix: &str) -> usize {
        let mut types = self.types.write().expect("agent catalog poisoned");
        let names: Vec<String> = types
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect();
        for name in &names {
            types.remove(name);
        }
        names.len()
    }

    /// Look up a definition by name.
    pub fn get(&self, name: &str) -> Option<AgentTypeDefinition> {
        self.types
            .read()
            .expect("agent catalog poisoned")
            .get(name)
            .cloned()
    }

    /// Whether a type exists.
    pub fn exists(&self, name: &str) -> bool {
        self.types
            .read()
            .expect("agent catalog poisoned")
            .contains_key(name)
    }

    /// All registered type names, in stable order.
    pub fn list_types(&self) -> Vec<String> {
        self.types
            .read()
            .expect("agent catalog poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// All definitions, in stable order.
    pub fn list_definitions(&self) -> Vec<AgentTypeDefinition> {
        self.types
            .read()
            .expect("agent catalog poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.types.read().expect("agent catalog poisoned").len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AgentTypeCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_present() {
        let catalog = AgentTypeCatalog::new();
        for name in ["explore", "plan", "code-review", "general"] {
            assert!(catalog.exists(name), "missing builtin {}", name);
        }
        assert_eq!(catalog.len(), 4);
    }

    #[test]
    fn builtin_defaults() {
        let catalog = AgentTypeCatalog::new();
        let explore = catalog.get("explore").unwrap();
        assert_eq!(explore.default_max_tokens, 30_000);
        assert!(explore.default_tools.is_some());

        let general = catalog.get("general").unwrap();
        assert!(general.default_tools.is_none());
    }

    #[test]
    fn register_rejects_duplicates() {
        let catalog = AgentTypeCatalog::new();
        let err = catalog.register(general_agent());
        assert!(err.is_err());
    }

    #[test]
    fn register_and_unregister_custom() {
        let catalog = AgentTypeCatalog::new();
        let mut custom = general_agent();
        custom.name = "docs".to_string();

        catalog.register(custom).unwrap();
        assert!(catalog.exists("docs"));
        assert!(catalog.unregister("docs"));
        assert!(!catalog.unregister("docs"));
    }

    #[test]
    fn unregister_prefixed_removes_plugin_types() {
        let catalog = AgentTypeCatalog::new();
        for name in ["pack:a", "pack:b", "other:c"] {
            let mut custom = general_agent();
            custom.name = name.to_string();
            catalog.register(custom).unwrap();
        }

        assert_eq!(catalog.unregister_prefixed("pack:"), 2);
        assert!(catalog.exists("other:c"));
    }

    #[test]
    fn to_value_shape() {
        let value = explore_agent().to_value();
        assert_eq!(value["name"], "explore");
        assert_eq!(value["default_max_time_seconds"], 180);
    }
}
