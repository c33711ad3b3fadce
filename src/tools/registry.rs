//! Tool registry - manages available tools for the agent
//!
//! The registry maps exposed names to tool instances. Built-in tools
//! keep their plain name; plugin tools are exposed as
//! `<plugin>__<name>` and MCP tools as `<server>/<tool>` so federated
//! names can never collide with local ones. Iteration order is stable.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::error::{Error, Result};
use crate::llm::ToolDefinition;

use super::traits::Tool;

/// Where a tool was registered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolSource {
    /// Compiled into the runtime
    Builtin,
    /// Contributed by a plugin (carries the plugin id)
    Plugin(String),
    /// Discovered from an MCP server (carries the server name)
    Mcp(String),
}

impl ToolSource {
    /// The exposed name for a tool from this source.
    pub fn exposed_name(&self, tool_name: &str) -> String {
        match self {
            ToolSource::Builtin => tool_name.to_string(),
            ToolSource::Plugin(plugin) => format!("{}__{}", plugin, tool_name),
            ToolSource::Mcp(server) => format!("{}/{}", server, tool_name),
        }
    }
}

struct Registered {
    tool: Arc<dyn Tool>,
    source: ToolSource,
}

/// Registry of available tools
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Registered>,
    aliases: BTreeMap<String, String>,
}

static GLOBAL: OnceLock<Arc<RwLock<ToolRegistry>>> = OnceLock::new();

impl ToolRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry shared by the executor and plugin loader.
    pub fn global() -> Arc<RwLock<ToolRegistry>> {
        GLOBAL
            .get_or_init(|| Arc::new(RwLock::new(ToolRegistry::new())))
            .clone()
    }

    /// Drop every entry from the global registry. Test hook only.
    pub fn reset_for_test() {
        if let Some(global) = GLOBAL.get() {
            let mut registry = global.write().expect("tool registry poisoned");
            registry.tools.clear();
            registry.aliases.clear();
        }
    }

    /// Register a tool under its source-derived exposed name.
    ///
    /// Registering the same (name, source) twice is a no-op; the same
    /// exposed name from a different source is a collision.
    pub fn register(&mut self, tool: Arc<dyn Tool>, source: ToolSource) -> Result<()> {
        let exposed = source.exposed_name(tool.name());

        if let Some(existing) = self.tools.get(&exposed) {
            if existing.source == source {
                return Ok(());
            }
            return Err(Error::InvalidInput(format!(
                "tool name collision: '{}' already registered",
                exposed
            )));
        }

        self.tools.insert(exposed, Registered { tool, source });
        Ok(())
    }

    /// Register an alias for an existing tool.
    pub fn alias(&mut self, alias: impl Into<String>, target: &str) -> Result<()> {
        if !self.tools.contains_key(target) {
            return Err(Error::NotFound(format!("tool '{}' not registered", target)));
        }
        let alias = alias.into();
        if self.tools.contains_key(&alias) {
            return Err(Error::InvalidInput(format!(
                "alias '{}' shadows a registered tool",
                alias
            )));
        }
        self.aliases.insert(alias, target.to_string());
        Ok(())
    }

    /// Look up a tool by exposed name or alias. Case-sensitive.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let resolved = self.aliases.get(name).map(String::as_str).unwrap_or(name);
        self.tools.get(resolved).map(|r| Arc::clone(&r.tool))
    }

    /// Remove one tool by exposed name. Returns true if it existed.
    pub fn unregister(&mut self, name: &str) -> bool {
        let removed = self.tools.remove(name).is_some();
        if removed {
            self.aliases.retain(|_, target| target != name);
        }
        removed
    }

    /// Remove every tool registered from a source. Returns the count.
    ///
    /// The whole removal happens under one registry lock, so observers
    /// never see a partially-removed plugin or server.
    pub fn unregister_source(&mut self, source: &ToolSource) -> usize {
        let names: Vec<String> = self
            .tools
            .iter()
            .filter(|(_, r)| r.source == *source)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &names {
            self.tools.remove(name);
            self.aliases.retain(|_, target| target != name);
        }
        names.len()
    }

    /// Get all tool definitions, in stable name order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|r| r.tool.to_definition()).collect()
    }

    /// Definitions filtered to an allow-list (None = all tools).
    pub fn definitions_for(&self, allow: Option<&[String]>) -> Vec<ToolDefinition> {
        match allow {
            None => self.definitions(),
            Some(allowed) => self
                .tools
                .iter()
                .filter(|(name, _)| allowed.iter().any(|a| a == *name))
                .map(|(_, r)| r.tool.to_definition())
                .collect(),
        }
    }

    /// Get tool count
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// List exposed tool names, in stable order.
    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }
}
